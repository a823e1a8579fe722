//! Command Hierarchy Builder
//!
//! Builds a CommandHierarchy from PM4 emulation events.
//! Implements the EmulateCallbacks trait for use with Pm4Emulator.
//!
//! All topologies are filled at once while the emulator walks the capture:
//! edges go into growable `AdjacencyLists`, which are baked into CSR
//! `Topology` values (in parallel) once the pass is over. The Vulkan views
//! are derived from AllEvent just before baking.

use rayon::prelude::*;

use super::command::{CommandHierarchy, TopologyType};
use super::derive::{self, CallClass};
use super::node::{AuxInfo, MarkerType, NodeType, Nodes, SyncType};
use super::topology::{AdjacencyLists, Topology, ROOT_NODE_INDEX};
use crate::core::capture::{
    vk_color_space_name, vk_format_name, CaptureData, EngineType, IndirectBufferInfo, PresentInfo,
    QueueType, SubmitInfo,
};
use crate::core::emulator::{EmulateCallbacks, IbType, Pm4Emulator};
use crate::core::memory::{read_dwords, DwordMemory, MemoryReader};
use crate::core::pm4::{
    self, event_type, opcode, Pm4Type, Type4Header, Type7Header, TYPE4_OPCODE,
};
use crate::core::pm4_info::{BuiltinPm4Info, Pm4Info, ENUM_EVENT_TYPE};
use crate::core::vulkan::{label_from_args, CallMarkerHeader, CallPrinter, LabelPrinter, VkCmdId};
use crate::error::{HierarchyError, Result};

/// Topologies that list packets and their decoded fields
const PACKET_TOPOLOGIES: [TopologyType; 4] = [
    TopologyType::Engine,
    TopologyType::Submit,
    TopologyType::AllEvent,
    TopologyType::Rgp,
];

/// Topologies that list IBs
const IB_TOPOLOGIES: [TopologyType; 2] = [TopologyType::Engine, TopologyType::Submit];

/// Topologies that nest events under markers
const EVENT_TOPOLOGIES: [TopologyType; 2] = [TopologyType::AllEvent, TopologyType::Rgp];

/// Build options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatorOptions {
    /// Attach chained IBs next to the IB they continue instead of under it
    pub flatten_chain_nodes: bool,
}

/// Event attached before its vkBeginCommandBuffer marker was seen
#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    node: u64,
    all_event_parent: u64,
    rgp_parent: u64,
}

/// vkCmdExecuteCommands scope
#[derive(Debug, Clone, Copy)]
struct SecondaryCmdBuf {
    /// The vkCmdExecuteCommands marker
    root: u64,
    /// IB stack depth the call was recorded at; secondary IBs run deeper
    depth: usize,
    /// `root` is currently pushed on the marker stacks as an extra level
    level_pushed: bool,
}

/// Builder state for one hierarchy construction pass
///
/// Reusable: every `create_trees*` call starts from a clean slate.
pub struct CommandHierarchyCreator<'a> {
    info: &'a dyn Pm4Info,
    printer: &'a dyn CallPrinter,
    options: CreatorOptions,

    nodes: Nodes,
    adjacency: [AdjacencyLists; TopologyType::COUNT],
    engine_nodes: Vec<(EngineType, u64)>,
    event_node_indices: Vec<u64>,
    num_events: u32,
    num_user_markers: u32,

    cur_submit: Option<u64>,
    /// Draw-engine IB stack
    dcb_ib_stack: Vec<u64>,
    /// Constant-engine IB stack
    ccb_ib_stack: Vec<u64>,
    on_constant_engine: bool,

    /// Open debug labels and Vulkan calls (AllEvent nesting)
    marker_stack: Vec<u64>,
    /// Same, for Rgp nesting
    internal_marker_stack: Vec<u64>,
    open_vulkan_call: Option<u64>,
    secondary: Option<SecondaryCmdBuf>,

    /// Packets since the last event
    packets: Vec<u64>,
    /// Packets and events since the IB started (vkBeginCommandBuffer backfill)
    cmd_begin_packets: Vec<u64>,
    cmd_begin_events: Vec<PendingEvent>,

    presents: Vec<PresentInfo>,
    metadata_version: u32,
    has_vulkan_marker: bool,
}

impl Default for CommandHierarchyCreator<'static> {
    fn default() -> Self {
        Self::with_options(CreatorOptions::default())
    }
}

impl CommandHierarchyCreator<'static> {
    /// Creator using the built-in metadata tables and label printer
    pub fn with_options(options: CreatorOptions) -> Self {
        Self::new(&BuiltinPm4Info, &LabelPrinter, options)
    }
}

impl<'a> CommandHierarchyCreator<'a> {
    pub fn new(info: &'a dyn Pm4Info, printer: &'a dyn CallPrinter, options: CreatorOptions) -> Self {
        Self {
            info,
            printer,
            options,
            nodes: Nodes::new(),
            adjacency: Default::default(),
            engine_nodes: Vec::new(),
            event_node_indices: Vec::new(),
            num_events: 0,
            num_user_markers: 0,
            cur_submit: None,
            dcb_ib_stack: Vec::with_capacity(8),
            ccb_ib_stack: Vec::with_capacity(8),
            on_constant_engine: false,
            marker_stack: Vec::with_capacity(16),
            internal_marker_stack: Vec::with_capacity(16),
            open_vulkan_call: None,
            secondary: None,
            packets: Vec::with_capacity(64),
            cmd_begin_packets: Vec::new(),
            cmd_begin_events: Vec::new(),
            presents: Vec::new(),
            metadata_version: 0,
            has_vulkan_marker: false,
        }
    }

    #[inline]
    pub fn options(&self) -> CreatorOptions {
        self.options
    }

    /// Build all topologies for a full capture
    pub fn create_trees<M: MemoryReader>(&mut self, capture: &CaptureData<M>) -> Result<CommandHierarchy> {
        self.begin_pass(&EngineType::ALL)?;
        self.metadata_version = capture.vulkan_metadata_version;
        self.presents = capture.presents.clone();

        let mut emulator = Pm4Emulator::new();
        for (i, submit) in capture.submits.iter().enumerate() {
            let submit_index = i as u32;
            self.on_submit_start(submit_index, submit)?;
            if submit.is_dummy_submit {
                log::debug!("submit {submit_index}: dummy submit, nothing to emulate");
            } else if !submit.engine_type.is_decodable() {
                log::warn!(
                    "submit {submit_index}: {} engine is not decoded",
                    submit.engine_type.name()
                );
            } else {
                emulator.execute_submit(&mut *self, &capture.memory, submit_index, &submit.ibs)?;
            }
            self.on_submit_end(submit_index, submit)?;
        }

        self.create_topologies()
    }

    /// Build from one raw command buffer: one submit with one IB at VA 0
    ///
    /// Only the Engine node of `engine` is created and no presents are added.
    pub fn create_trees_from_dwords(
        &mut self,
        engine: EngineType,
        queue: QueueType,
        dwords: &[u32],
    ) -> Result<CommandHierarchy> {
        if !engine.is_decodable() {
            return Err(HierarchyError::UnsupportedSubmit { engine });
        }
        self.begin_pass(&[engine])?;

        let memory = DwordMemory::from_dwords(dwords);
        let ib = IndirectBufferInfo::new(0, memory.size_in_dwords());
        let submit = SubmitInfo::new(engine, queue, vec![ib]);
        self.on_submit_start(0, &submit)?;
        Pm4Emulator::new().execute_submit(&mut *self, &memory, 0, &submit.ibs)?;
        self.on_submit_end(0, &submit)?;

        self.create_topologies()
    }

    // ========================================================================
    // Pass lifecycle
    // ========================================================================

    fn reset(&mut self) {
        self.nodes = Nodes::new();
        self.adjacency = Default::default();
        self.engine_nodes.clear();
        self.event_node_indices.clear();
        self.num_events = 0;
        self.num_user_markers = 0;
        self.cur_submit = None;
        self.dcb_ib_stack.clear();
        self.ccb_ib_stack.clear();
        self.on_constant_engine = false;
        self.marker_stack.clear();
        self.internal_marker_stack.clear();
        self.open_vulkan_call = None;
        self.secondary = None;
        self.packets.clear();
        self.cmd_begin_packets.clear();
        self.cmd_begin_events.clear();
        self.presents.clear();
        self.metadata_version = 0;
        self.has_vulkan_marker = false;
    }

    /// Reset, then add the root and one Engine node per engine
    fn begin_pass(&mut self, engines: &[EngineType]) -> Result<()> {
        self.reset();
        let root = self.add_node(NodeType::Root, String::new(), AuxInfo::None, &[]);
        debug_assert_eq!(root, ROOT_NODE_INDEX);
        for &engine in engines {
            let node = self.add_node(NodeType::Engine, engine.name().to_string(), AuxInfo::None, &[]);
            self.add_child(TopologyType::Engine, root, node)?;
            self.engine_nodes.push((engine, node));
        }
        Ok(())
    }

    /// Derive the Vulkan views and bake every topology
    fn create_topologies(&mut self) -> Result<CommandHierarchy> {
        let vulkan_call = {
            let nodes = &self.nodes;
            derive::filter_topology(&self.adjacency[TopologyType::AllEvent.index()], |n| {
                is_excluded_from_vulkan_call(nodes, n)
            })
        };
        let vulkan_event = {
            let nodes = &self.nodes;
            derive::collapse_topology(&vulkan_call, |n| classify_call(nodes, n))
        };
        self.adjacency[TopologyType::VulkanCall.index()] = vulkan_call;
        self.adjacency[TopologyType::VulkanEvent.index()] = vulkan_event;

        let adjacency = std::mem::take(&mut self.adjacency);
        let baked = adjacency[..]
            .par_iter()
            .map(|adj| -> Result<Topology> {
                let mut topology = Topology::from_adjacency(adj)?;
                topology.shrink_to_fit();
                Ok(topology)
            })
            .collect::<Result<Vec<Topology>>>()?;
        let topologies: [Topology; TopologyType::COUNT] = baked
            .try_into()
            .map_err(|_| HierarchyError::invariant("topology count mismatch"))?;

        let mut nodes = std::mem::take(&mut self.nodes);
        nodes.shrink_to_fit();

        log::debug!(
            "hierarchy built: {} nodes, {} events, {} all-event edges",
            nodes.len(),
            self.event_node_indices.len(),
            topologies[TopologyType::AllEvent.index()].num_owned_edges()
        );

        // Enable with CMDTREE_DEBUG_HIERARCHY=1
        #[cfg(feature = "memory_tracking")]
        if std::env::var("CMDTREE_DEBUG_HIERARCHY").is_ok() {
            for t in TopologyType::ALL {
                let topology = &topologies[t.index()];
                log::debug!(
                    "[HIERARCHY] {}: owned {} shared {}",
                    t.name(),
                    topology.num_owned_edges(),
                    topology.num_shared_edges()
                );
            }
            log::debug!(
                "[HIERARCHY] node store: {:.2} MB",
                nodes.heap_size() as f64 / 1_000_000.0
            );
        }

        Ok(CommandHierarchy::new(
            nodes,
            topologies,
            std::mem::take(&mut self.event_node_indices),
            self.metadata_version,
            self.has_vulkan_marker,
        ))
    }

    // ========================================================================
    // Node and edge helpers
    // ========================================================================

    fn add_node(&mut self, node_type: NodeType, desc: String, aux_info: AuxInfo, metadata: &[u8]) -> u64 {
        let idx = self.nodes.add_node(node_type, desc, aux_info, metadata);
        for adj in &mut self.adjacency {
            adj.push_node();
        }
        idx
    }

    #[inline]
    fn add_child(&mut self, topology: TopologyType, parent: u64, child: u64) -> Result<()> {
        self.adjacency[topology.index()].add_child(parent, child)
    }

    #[inline]
    fn add_shared_child(&mut self, topology: TopologyType, parent: u64, child: u64) -> Result<()> {
        self.adjacency[topology.index()].add_shared_child(parent, child)
    }

    fn current_submit(&self) -> Result<u64> {
        self.cur_submit
            .ok_or_else(|| HierarchyError::invariant("no submit in progress"))
    }

    #[inline]
    fn ib_stack(&self) -> &Vec<u64> {
        if self.on_constant_engine {
            &self.ccb_ib_stack
        } else {
            &self.dcb_ib_stack
        }
    }

    /// Parents for a new node in AllEvent and Rgp: top of each marker stack
    #[inline]
    fn marker_parents(&self, submit: u64) -> (u64, u64) {
        (
            self.marker_stack.last().copied().unwrap_or(submit),
            self.internal_marker_stack.last().copied().unwrap_or(submit),
        )
    }

    fn attach_to_markers(&mut self, node: u64, submit: u64) -> Result<()> {
        let (all_event_parent, rgp_parent) = self.marker_parents(submit);
        self.add_child(TopologyType::AllEvent, all_event_parent, node)?;
        self.add_child(TopologyType::Rgp, rgp_parent, node)
    }

    // ========================================================================
    // Packets
    // ========================================================================

    fn add_packet_node(&mut self, va_addr: u64, pm4_type: Pm4Type, payload: &[u32], is_ce: bool) -> Result<u64> {
        let header = payload[0];
        match pm4_type {
            Pm4Type::Type7 => {
                let op = Type7Header(header).opcode();
                let desc = format!("{} 0x{header:x}", self.info.opcode_name(op));
                let packet = self.add_node(NodeType::Packet, desc, AuxInfo::packet(va_addr, op, is_ce)?, &[]);
                self.append_packet_fields(packet, op, payload, is_ce)?;
                Ok(packet)
            }
            Pm4Type::Type4 => {
                let first_reg = Type4Header(header).offset();
                let desc = format!("TYPE4 REGWRITE 0x{header:x}");
                let aux = AuxInfo::packet(va_addr, TYPE4_OPCODE, is_ce)?;
                let packet = self.add_node(NodeType::Packet, desc, aux, &[]);
                for (i, &value) in payload[1..].iter().enumerate() {
                    self.append_reg_node(packet, first_reg + i as u32, value, is_ce)?;
                }
                Ok(packet)
            }
            Pm4Type::Unknown => Err(HierarchyError::invariant(format!(
                "no packet node for unknown header 0x{header:x}"
            ))),
        }
    }

    /// Decode Type7 payload fields; DWORDs without a field are listed raw
    fn append_packet_fields(&mut self, packet: u64, op: u8, payload: &[u32], is_ce: bool) -> Result<()> {
        let info = self.info;
        let count = payload.len() as u32 - 1;
        let raw_start = match info.packet_info(op) {
            Some(packet_info) => {
                let mut last_dword = 0;
                for field in packet_info.fields {
                    if field.dword > count {
                        break;
                    }
                    let value = (payload[field.dword as usize] & field.mask) >> field.shift;
                    let desc = match field.enum_handle.and_then(|h| info.enum_string(h, value)) {
                        Some(name) => format!("{}: {name}", field.name),
                        None => format!("{}: 0x{value:x}", field.name),
                    };
                    self.add_reg_field_node(packet, NodeType::Field, desc, is_ce)?;
                    last_dword = field.dword;
                }
                if packet_info.fields.is_empty() {
                    None
                } else {
                    Some(last_dword + 1)
                }
            }
            None => Some(1),
        };
        if let Some(start) = raw_start {
            for dword in start..=count {
                let desc = format!("(DWORD {dword}): 0x{:x}", payload[dword as usize]);
                self.add_reg_field_node(packet, NodeType::Field, desc, is_ce)?;
            }
        }
        Ok(())
    }

    fn append_reg_node(&mut self, packet: u64, reg: u32, value: u32, is_ce: bool) -> Result<()> {
        let info = self.info;
        match info.reg_info(reg) {
            Some(reg_info) => {
                let desc = format!("{}: 0x{value:x}", reg_info.name);
                let reg_node = self.add_reg_field_node(packet, NodeType::Reg, desc, is_ce)?;
                for field in reg_info.fields {
                    let desc = format!("{}: 0x{:x}", field.name, (value & field.mask) >> field.shift);
                    self.add_reg_field_node(reg_node, NodeType::Field, desc, is_ce)?;
                }
            }
            None => {
                self.add_reg_field_node(packet, NodeType::Reg, format!("Unknown: 0x{value:x}"), is_ce)?;
            }
        }
        Ok(())
    }

    fn add_reg_field_node(&mut self, parent: u64, node_type: NodeType, desc: String, is_ce: bool) -> Result<u64> {
        let node = self.add_node(node_type, desc, AuxInfo::RegField { is_ce_packet: is_ce }, &[]);
        for t in PACKET_TOPOLOGIES {
            self.add_child(t, parent, node)?;
        }
        Ok(node)
    }

    /// Close the run of cached packets with an event or sync node
    fn attach_event(&mut self, node: u64, submit: u64) -> Result<()> {
        for t in EVENT_TOPOLOGIES {
            let adjacency = &mut self.adjacency[t.index()];
            for &packet in &self.packets {
                adjacency.add_shared_child(node, packet)?;
            }
        }
        self.packets.clear();

        let (all_event_parent, rgp_parent) = self.marker_parents(submit);
        self.add_child(TopologyType::AllEvent, all_event_parent, node)?;
        self.add_child(TopologyType::Rgp, rgp_parent, node)?;
        self.cmd_begin_events.push(PendingEvent {
            node,
            all_event_parent,
            rgp_parent,
        });
        Ok(())
    }

    // ========================================================================
    // Vulkan call markers
    // ========================================================================

    /// Parse a CP_NOP payload; returns true if it carried a call marker
    fn parse_call_marker(&mut self, payload: &[u32], submit: u64) -> Result<bool> {
        let Some(&first) = payload.get(1) else {
            return Ok(false);
        };
        let header = CallMarkerHeader(first);
        if !header.is_call_marker() {
            return Ok(false);
        }
        let Some(cmd) = VkCmdId::from_u8(header.cmd_id()) else {
            log::warn!("call marker with unknown command id {}", header.cmd_id());
            return Ok(false);
        };
        let args: Vec<u8> = payload[2..].iter().flat_map(|dw| dw.to_le_bytes()).collect();
        self.has_vulkan_marker = true;

        match cmd {
            VkCmdId::BeginCommandBuffer => self.on_begin_command_buffer(cmd, &args, submit)?,
            VkCmdId::EndCommandBuffer => self.on_end_command_buffer(cmd, &args, submit)?,
            c if c.is_debug_label_begin() => self.on_debug_label_begin(cmd, &args, submit)?,
            c if c.is_debug_label_end() => self.on_debug_label_end()?,
            c if c.is_debug_label_insert() => self.on_debug_label_insert(cmd, &args, submit)?,
            _ => self.on_vulkan_call(cmd, &args, submit)?,
        }

        self.cmd_begin_packets.clear();
        self.cmd_begin_events.clear();
        Ok(true)
    }

    fn call_desc(&self, cmd: VkCmdId, args: &[u8]) -> String {
        format!(
            "{}{}",
            cmd.name(),
            self.printer.print_brief(cmd, args, self.metadata_version)
        )
    }

    /// Inside a secondary command buffer called by vkCmdExecuteCommands
    #[inline]
    fn in_secondary(&self) -> bool {
        let depth = self.ib_stack().len();
        self.secondary.is_some_and(|s| depth > s.depth)
    }

    fn open_call(&mut self, marker: u64) {
        self.marker_stack.push(marker);
        self.internal_marker_stack.push(marker);
        self.open_vulkan_call = Some(marker);
    }

    /// Pop the open Vulkan call marker, if any
    fn close_vulkan_call(&mut self) -> Result<()> {
        if let Some(call) = self.open_vulkan_call.take() {
            if self.marker_stack.last() != Some(&call) {
                return Err(HierarchyError::invariant(format!(
                    "open call marker {call} is not on top of the marker stack"
                )));
            }
            self.marker_stack.pop();
            if self.internal_marker_stack.last() == Some(&call) {
                self.internal_marker_stack.pop();
            }
        }
        Ok(())
    }

    /// Push the vkCmdExecuteCommands marker as an extra nesting level
    fn push_secondary_level(&mut self) -> Option<u64> {
        let sec = self.secondary.as_mut()?;
        if !sec.level_pushed {
            self.marker_stack.push(sec.root);
            self.internal_marker_stack.push(sec.root);
            sec.level_pushed = true;
        }
        Some(sec.root)
    }

    fn pop_secondary_level(&mut self) {
        let Some(sec) = self.secondary.as_mut() else {
            return;
        };
        if !sec.level_pushed {
            return;
        }
        sec.level_pushed = false;
        let root = sec.root;
        for stack in [&mut self.marker_stack, &mut self.internal_marker_stack] {
            if let Some(pos) = stack.iter().rposition(|&n| n == root) {
                if pos + 1 != stack.len() {
                    log::warn!("{} markers left open in secondary command buffer", stack.len() - pos - 1);
                }
                stack.truncate(pos);
            }
        }
    }

    fn on_begin_command_buffer(&mut self, cmd: VkCmdId, args: &[u8], submit: u64) -> Result<()> {
        self.close_vulkan_call()?;
        let desc = self.call_desc(cmd, args);
        let aux = AuxInfo::Marker {
            marker_type: MarkerType::DiveMetadata,
            id: cmd as u32,
        };
        let marker = self.add_node(NodeType::Marker, desc, aux, args);

        // Events seen earlier in this IB belong to this command buffer
        let pending = std::mem::take(&mut self.cmd_begin_events);
        self.detach_pending_events(&pending)?;

        let parent = if self.in_secondary() {
            self.push_secondary_level().unwrap_or(submit)
        } else {
            submit
        };
        for t in EVENT_TOPOLOGIES {
            self.add_child(t, parent, marker)?;
        }
        for event in &pending {
            for t in EVENT_TOPOLOGIES {
                self.add_child(t, marker, event.node)?;
            }
        }
        let packets = std::mem::take(&mut self.cmd_begin_packets);
        for &packet in &packets {
            for t in EVENT_TOPOLOGIES {
                self.add_shared_child(t, marker, packet)?;
            }
        }

        self.open_call(marker);
        Ok(())
    }

    /// Remove pending events from their provisional parents, keeping order
    fn detach_pending_events(&mut self, pending: &[PendingEvent]) -> Result<()> {
        for t in EVENT_TOPOLOGIES {
            let mut groups: Vec<(u64, Vec<u64>)> = Vec::new();
            for event in pending {
                let parent = match t {
                    TopologyType::AllEvent => event.all_event_parent,
                    _ => event.rgp_parent,
                };
                match groups.iter_mut().find(|(p, _)| *p == parent) {
                    Some((_, nodes)) => nodes.push(event.node),
                    None => groups.push((parent, vec![event.node])),
                }
            }
            for (parent, nodes) in groups {
                self.adjacency[t.index()].remove_children(parent, &nodes)?;
            }
        }
        Ok(())
    }

    fn on_end_command_buffer(&mut self, cmd: VkCmdId, args: &[u8], submit: u64) -> Result<()> {
        self.close_vulkan_call()?;
        let desc = self.call_desc(cmd, args);
        let aux = AuxInfo::Marker {
            marker_type: MarkerType::DiveMetadata,
            id: cmd as u32,
        };
        let marker = self.add_node(NodeType::Marker, desc, aux, args);
        self.attach_to_markers(marker, submit)?;
        if self.in_secondary() {
            self.pop_secondary_level();
        }
        Ok(())
    }

    fn on_debug_label_begin(&mut self, cmd: VkCmdId, args: &[u8], submit: u64) -> Result<()> {
        self.close_vulkan_call()?;
        let label = match label_from_args(args) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => cmd.name().to_string(),
        };
        let aux = AuxInfo::Marker {
            marker_type: MarkerType::BeginEnd,
            id: self.next_user_marker_id(),
        };
        let marker = self.add_node(NodeType::Marker, label, aux, args);
        self.attach_to_markers(marker, submit)?;
        self.marker_stack.push(marker);
        self.internal_marker_stack.push(marker);
        Ok(())
    }

    fn on_debug_label_end(&mut self) -> Result<()> {
        self.close_vulkan_call()?;
        match self.marker_stack.last().copied() {
            Some(top) if self.nodes.marker_type(top) == Some(MarkerType::BeginEnd) => {
                self.marker_stack.pop();
                if self.internal_marker_stack.last() == Some(&top) {
                    self.internal_marker_stack.pop();
                }
            }
            _ => log::warn!("debug label end without a matching begin"),
        }
        Ok(())
    }

    fn on_debug_label_insert(&mut self, cmd: VkCmdId, args: &[u8], submit: u64) -> Result<()> {
        self.close_vulkan_call()?;
        let label = match label_from_args(args) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => cmd.name().to_string(),
        };
        let aux = AuxInfo::Marker {
            marker_type: MarkerType::Insert,
            id: self.next_user_marker_id(),
        };
        let marker = self.add_node(NodeType::Marker, label, aux, args);
        self.attach_to_markers(marker, submit)
    }

    /// Any other call: open it until the next call or the end of its IB
    fn on_vulkan_call(&mut self, cmd: VkCmdId, args: &[u8], submit: u64) -> Result<()> {
        self.close_vulkan_call()?;
        let depth = self.ib_stack().len();
        if self.secondary.is_some_and(|s| s.depth == depth) {
            // A primary-level call ends the vkCmdExecuteCommands scope
            self.secondary = None;
        }

        let marker_type = if cmd == VkCmdId::CmdPipelineBarrier {
            MarkerType::Barrier
        } else {
            MarkerType::DiveMetadata
        };
        let desc = self.call_desc(cmd, args);
        let aux = AuxInfo::Marker {
            marker_type,
            id: cmd as u32,
        };
        let marker = self.add_node(NodeType::Marker, desc, aux, args);
        self.attach_to_markers(marker, submit)?;
        self.open_call(marker);

        if cmd == VkCmdId::CmdExecuteCommands {
            self.secondary = Some(SecondaryCmdBuf {
                root: marker,
                depth,
                level_pushed: false,
            });
        }
        Ok(())
    }

    #[inline]
    fn next_user_marker_id(&mut self) -> u32 {
        let id = self.num_user_markers;
        self.num_user_markers += 1;
        id
    }

    fn present_desc(index: usize, present: &PresentInfo) -> String {
        match &present.surface {
            Some(surface) => format!(
                "Present: {index}, FullScreen: {}, Engine: {}, Queue: {}, SurfaceAddr: 0x{:x}, \
                 SurfaceSize: {}, VkFormat: {}, VkColorSpaceKHR: {}",
                surface.full_screen as u8,
                surface.engine_type.name(),
                surface.queue_type.name(),
                surface.surface_addr,
                surface.surface_size,
                vk_format_name(surface.vk_format),
                vk_color_space_name(surface.vk_color_space),
            ),
            None => format!("Present: {index}"),
        }
    }
}

// ============================================================================
// EmulateCallbacks
// ============================================================================

impl<'a> EmulateCallbacks for CommandHierarchyCreator<'a> {
    fn on_submit_start(&mut self, submit_index: u32, info: &SubmitInfo) -> Result<()> {
        let engine_node = self
            .engine_nodes
            .iter()
            .find(|(engine, _)| *engine == info.engine_type)
            .map(|&(_, node)| node)
            .ok_or_else(|| {
                HierarchyError::invariant(format!("no {} engine node", info.engine_type.name()))
            })?;

        let desc = format!(
            "Submit: {}, Num IBs: {}, Engine: {}, Queue: {}, Engine Index: {}, Dummy Submit: {}",
            submit_index,
            info.num_indirect_buffers(),
            info.engine_type.name(),
            info.queue_type.name(),
            info.engine_index,
            info.is_dummy_submit as u8
        );
        let aux = AuxInfo::Submit {
            engine_type: info.engine_type,
            submit_index,
        };
        let submit = self.add_node(NodeType::Submit, desc, aux, &[]);
        self.add_child(TopologyType::Engine, engine_node, submit)?;
        for t in [TopologyType::Submit, TopologyType::AllEvent, TopologyType::Rgp] {
            self.add_child(t, ROOT_NODE_INDEX, submit)?;
        }
        self.cur_submit = Some(submit);
        log::debug!(
            "submit {submit_index}: {} IBs on {}",
            info.num_indirect_buffers(),
            info.engine_type.name()
        );
        Ok(())
    }

    fn on_submit_end(&mut self, submit_index: u32, _info: &SubmitInfo) -> Result<()> {
        let submit = self.current_submit()?;

        // IBs were added in emulation order
        {
            let nodes = &self.nodes;
            if let Some(children) = self.adjacency[TopologyType::Submit.index()].owned_mut(submit) {
                children.sort_by_key(|&c| nodes.ib_index(c).unwrap_or(u8::MAX));
            }
        }

        let unterminated = self
            .marker_stack
            .iter()
            .filter(|&&m| self.nodes.marker_type(m) == Some(MarkerType::BeginEnd))
            .count();
        if unterminated > 0 {
            log::warn!("submit {submit_index}: {unterminated} debug labels left open");
        }
        self.marker_stack.clear();
        self.internal_marker_stack.clear();
        self.open_vulkan_call = None;
        self.secondary = None;

        if !self.packets.is_empty() {
            let desc = if self.adjacency[TopologyType::AllEvent.index()].owned(submit).is_empty() {
                "Postamble State"
            } else {
                "State"
            };
            let state = self.add_node(NodeType::PostambleState, desc.to_string(), AuxInfo::None, &[]);
            let leftover = std::mem::take(&mut self.packets);
            for &packet in &leftover {
                for t in EVENT_TOPOLOGIES {
                    self.add_shared_child(t, state, packet)?;
                }
            }
            for t in EVENT_TOPOLOGIES {
                self.add_child(t, submit, state)?;
            }
        }

        let presents = std::mem::take(&mut self.presents);
        for (i, present) in presents.iter().enumerate() {
            if present.submit_index != submit_index {
                continue;
            }
            let node = self.add_node(NodeType::Present, Self::present_desc(i, present), AuxInfo::None, &[]);
            for t in EVENT_TOPOLOGIES {
                self.add_child(t, ROOT_NODE_INDEX, node)?;
            }
        }
        self.presents = presents;

        self.cur_submit = None;
        self.dcb_ib_stack.clear();
        self.ccb_ib_stack.clear();
        self.cmd_begin_packets.clear();
        self.cmd_begin_events.clear();
        Ok(())
    }

    fn on_ib_start(
        &mut self,
        submit_index: u32,
        ib_index: u32,
        info: &IndirectBufferInfo,
        ib_type: IbType,
    ) -> Result<()> {
        let submit = self.current_submit()?;
        self.on_constant_engine = info.is_constant_engine;

        let prefix = match ib_type {
            IbType::Normal => format!("IB: {ib_index}"),
            IbType::Call => "Call IB".to_string(),
            IbType::Chain => "Chain IB".to_string(),
        };
        let mut desc = format!(
            "{prefix}, Address: 0x{:x}, Size (DWORDS): {}",
            info.va_addr, info.size_in_dwords
        );
        if info.skip {
            desc.push_str(", NOT CAPTURED");
        }
        let aux = AuxInfo::ib(ib_index, ib_type, info.size_in_dwords, !info.skip)?;
        let node = self.add_node(NodeType::Ib, desc, aux, &[]);

        let stack = self.ib_stack();
        let mut parent = stack.last().copied().unwrap_or(submit);
        if self.options.flatten_chain_nodes && ib_type == IbType::Chain {
            if let Some(&owner) = stack
                .iter()
                .rev()
                .find(|&&n| self.nodes.ib_type(n) != Some(IbType::Chain))
            {
                parent = owner;
            }
        }
        for t in IB_TOPOLOGIES {
            self.add_child(t, parent, node)?;
        }

        if self.on_constant_engine {
            self.ccb_ib_stack.push(node);
        } else {
            self.dcb_ib_stack.push(node);
        }
        self.cmd_begin_packets.clear();
        self.cmd_begin_events.clear();
        log::trace!("submit {submit_index}: {ib_type:?} IB {ib_index} at 0x{:x}", info.va_addr);
        Ok(())
    }

    fn on_ib_end(&mut self, _submit_index: u32, _ib_index: u32, _info: &IndirectBufferInfo) -> Result<()> {
        let nodes = &self.nodes;
        let stack = if self.on_constant_engine {
            &mut self.ccb_ib_stack
        } else {
            &mut self.dcb_ib_stack
        };
        if stack.is_empty() {
            return Err(HierarchyError::invariant("IB end with an empty IB stack"));
        }
        // A chain run ends together with the IB that started it
        while stack.len() > 1 && stack.last().and_then(|&n| nodes.ib_type(n)) == Some(IbType::Chain) {
            stack.pop();
        }
        stack.pop();
        let depth = stack.len();

        self.close_vulkan_call()?;
        if let Some(sec) = self.secondary {
            if depth <= sec.depth {
                self.pop_secondary_level();
            }
            if depth < sec.depth {
                self.secondary = None;
            }
        }
        self.cmd_begin_packets.clear();
        self.cmd_begin_events.clear();
        Ok(())
    }

    fn on_packet(
        &mut self,
        mem: &dyn MemoryReader,
        submit_index: u32,
        _ib_index: u32,
        va_addr: u64,
        pm4_type: Pm4Type,
        header: u32,
    ) -> Result<()> {
        if pm4_type == Pm4Type::Unknown {
            return Ok(());
        }
        let submit = self.current_submit()?;
        let top_ib = *self
            .ib_stack()
            .last()
            .ok_or_else(|| HierarchyError::invariant("packet outside of any IB"))?;

        let size = pm4::packet_size_in_dwords(pm4_type, header) as usize;
        let payload = read_dwords(mem, submit_index, va_addr, size)?;
        let packet = self.add_packet_node(va_addr, pm4_type, &payload, self.on_constant_engine)?;
        for t in PACKET_TOPOLOGIES {
            self.add_shared_child(t, submit, packet)?;
        }
        for t in IB_TOPOLOGIES {
            self.add_shared_child(t, top_ib, packet)?;
        }
        self.packets.push(packet);
        self.cmd_begin_packets.push(packet);

        let mut is_marker = false;
        if pm4_type == Pm4Type::Type7 {
            let op = Type7Header(header).opcode();
            if let Some((sync_type, sync_info)) = classify_sync(op, &payload) {
                let desc = match sync_type {
                    SyncType::CacheFlush | SyncType::CacheInvalidate => format!(
                        "{}: {}",
                        sync_type.name(),
                        self.info.enum_string(ENUM_EVENT_TYPE, sync_info).unwrap_or("Unknown")
                    ),
                    _ => sync_type.name().to_string(),
                };
                let aux = AuxInfo::Sync {
                    sync_type,
                    sync_info,
                };
                let node = self.add_node(NodeType::Sync, desc, aux, &[]);
                self.attach_event(node, submit)?;
            } else if pm4::is_draw_dispatch_dma_event(op) {
                let event_id = self.num_events;
                self.num_events += 1;
                let aux = AuxInfo::Event { event_id };
                let node = self.add_node(NodeType::DrawDispatchDma, pm4::event_name(op).to_string(), aux, &[]);
                self.event_node_indices.push(node);
                self.attach_event(node, submit)?;
            } else if op == opcode::CP_NOP {
                is_marker = self.parse_call_marker(&payload, submit)?;
            }
        }

        if !is_marker {
            let all_event = &mut self.adjacency[TopologyType::AllEvent.index()];
            for &marker in &self.marker_stack {
                all_event.add_shared_child(marker, packet)?;
            }
            let rgp = &mut self.adjacency[TopologyType::Rgp.index()];
            for &marker in &self.internal_marker_stack {
                rgp.add_shared_child(marker, packet)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Sync performed by a Type7 packet, with its info word
fn classify_sync(op: u8, payload: &[u32]) -> Option<(SyncType, u32)> {
    match op {
        opcode::CP_WAIT_FOR_IDLE => Some((SyncType::WaitForIdle, 0)),
        opcode::CP_WAIT_FOR_ME => Some((SyncType::WaitForMe, 0)),
        opcode::CP_WAIT_MEM_WRITES => Some((SyncType::WaitMemWrites, 0)),
        opcode::CP_WAIT_REG_MEM => Some((SyncType::WaitRegMem, payload.get(1).copied().unwrap_or(0))),
        opcode::CP_EVENT_WRITE => {
            let event = payload.get(1)? & pm4::EVENT_TYPE_MASK;
            match event {
                event_type::CACHE_FLUSH_TS
                | event_type::CACHE_FLUSH
                | event_type::PC_CCU_FLUSH_DEPTH_TS
                | event_type::PC_CCU_FLUSH_COLOR_TS => Some((SyncType::CacheFlush, event)),
                event_type::PC_CCU_INVALIDATE_DEPTH
                | event_type::PC_CCU_INVALIDATE_COLOR
                | event_type::CACHE_INVALIDATE => Some((SyncType::CacheInvalidate, event)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Nodes absent from the VulkanCall view
fn is_excluded_from_vulkan_call(nodes: &Nodes, node: u64) -> bool {
    match nodes.node_type(node) {
        Some(NodeType::DrawDispatchDma | NodeType::Sync | NodeType::PostambleState) => true,
        Some(NodeType::Marker) => nodes.marker_type(node) == Some(MarkerType::Barrier),
        _ => false,
    }
}

fn classify_call(nodes: &Nodes, node: u64) -> CallClass {
    if nodes.marker_type(node) != Some(MarkerType::DiveMetadata) {
        return CallClass::NonVulkan;
    }
    let cmd = match nodes.aux_info(node) {
        Some(AuxInfo::Marker { id, .. }) => u8::try_from(*id).ok().and_then(VkCmdId::from_u8),
        _ => None,
    };
    match cmd {
        Some(cmd) if cmd.is_event() => CallClass::VulkanEvent,
        _ => CallClass::VulkanNonEvent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::PresentSurface;
    use crate::testing::StreamBuilder;

    fn make_capture(stream: &StreamBuilder, ibs: Vec<IndirectBufferInfo>) -> CaptureData<DwordMemory> {
        let mut capture = CaptureData::new(stream.memory());
        capture
            .submits
            .push(SubmitInfo::new(EngineType::Universal, QueueType::Universal, ibs));
        capture
    }

    fn build(stream: &StreamBuilder, ibs: Vec<IndirectBufferInfo>) -> CommandHierarchy {
        CommandHierarchyCreator::default()
            .create_trees(&make_capture(stream, ibs))
            .unwrap()
    }

    fn descs(h: &CommandHierarchy, nodes: &[u64]) -> Vec<String> {
        nodes.iter().map(|&n| h.node_desc(n).unwrap().to_string()).collect()
    }

    /// First submit node in the AllEvent view
    fn first_submit(h: &CommandHierarchy) -> u64 {
        h.all_event_topology().children(ROOT_NODE_INDEX)[0]
    }

    fn find_node(h: &CommandHierarchy, desc: &str) -> u64 {
        (0..h.num_nodes())
            .find(|&n| h.node_desc(n).unwrap() == desc)
            .unwrap_or_else(|| panic!("no node {desc:?}"))
    }

    #[test]
    fn test_engine_and_submit_views() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.state().draw();
        });
        let h = build(&s, vec![ib]);

        let engine = h.engine_topology();
        let engines = engine.children(ROOT_NODE_INDEX);
        assert_eq!(descs(&h, engines), vec!["Universal", "Compute", "DMA", "Timer", "Other"]);

        let submit = engine.children(engines[0])[0];
        assert_eq!(
            h.node_desc(submit).unwrap(),
            "Submit: 0, Num IBs: 1, Engine: Universal, Queue: Universal, Engine Index: 0, Dummy Submit: 0"
        );
        assert_eq!(h.submit_node_engine_type(submit).unwrap(), EngineType::Universal);

        let ib_node = engine.children(submit)[0];
        assert_eq!(h.node_desc(ib_node).unwrap(), "IB: 0, Address: 0x0, Size (DWORDS): 10");
        assert!(h.ib_node_is_fully_captured(ib_node).unwrap());
        assert_eq!(h.submit_topology().children(submit), &[ib_node]);

        let packets = engine.shared_children(ib_node);
        assert_eq!(packets.len(), 2);
        assert_eq!(engine.shared_children(submit), packets);
        assert!(h.node_desc(packets[0]).unwrap().starts_with("TYPE4 REGWRITE 0x"));
        assert!(h.node_desc(packets[1]).unwrap().starts_with("CP_DRAW_INDX_OFFSET 0x"));
        assert_eq!(h.packet_node_opcode(packets[0]).unwrap(), TYPE4_OPCODE);
        assert_eq!(h.packet_node_addr(packets[1]).unwrap(), 8);
    }

    #[test]
    fn test_register_and_field_nodes() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.state().type4(0x1234, &[0x7]).draw();
        });
        let h = build(&s, vec![ib]);
        let t = h.engine_topology();
        let ib_node = find_node(&h, "IB: 0, Address: 0x0, Size (DWORDS): 12");
        let packets = t.shared_children(ib_node);

        let reg = t.children(packets[0])[0];
        assert_eq!(h.node_desc(reg).unwrap(), "RB_DEPTH_CNTL: 0x3");
        assert_eq!(
            descs(&h, t.children(reg)),
            vec!["Z_TEST_ENABLE: 0x1", "Z_WRITE_ENABLE: 0x1", "ZFUNC: 0x0"]
        );
        assert_eq!(descs(&h, t.children(packets[1])), vec!["Unknown: 0x7"]);
        assert!(!h.reg_field_node_is_ce(reg).unwrap());

        let draw_fields = descs(&h, t.children(packets[2]));
        assert_eq!(draw_fields[0], "PRIM_TYPE: DI_PT_TRILIST");
        assert!(draw_fields.contains(&"NUM_INDICES: 0x3".to_string()));
        // Fields are owned in the event views too
        assert_eq!(h.all_event_topology().parent_node_index(reg), Some(packets[0]));
    }

    #[test]
    fn test_unknown_opcode_lists_raw_dwords() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.type7(0x7e, &[5, 6]);
        });
        let h = build(&s, vec![ib]);
        let packet = h.engine_topology().shared_children(find_node(
            &h,
            "IB: 0, Address: 0x0, Size (DWORDS): 3",
        ))[0];
        assert!(h.node_desc(packet).unwrap().starts_with("Unknown 0x"));
        assert_eq!(
            descs(&h, h.engine_topology().children(packet)),
            vec!["(DWORD 1): 0x5", "(DWORD 2): 0x6"]
        );
    }

    #[test]
    fn test_submit_view_sorts_ibs() {
        let mut creator = CommandHierarchyCreator::default();
        creator.begin_pass(&[EngineType::Universal]).unwrap();
        let submit = SubmitInfo::new(EngineType::Universal, QueueType::Universal, Vec::new());
        creator.on_submit_start(0, &submit).unwrap();
        for ib_index in [2, 0, 1] {
            let ib = IndirectBufferInfo::new(0x1000 * ib_index as u64, 0);
            creator.on_ib_start(0, ib_index, &ib, IbType::Normal).unwrap();
            creator.on_ib_end(0, ib_index, &ib).unwrap();
        }
        creator.on_submit_end(0, &submit).unwrap();
        let h = creator.create_topologies().unwrap();

        let submit_node = h.submit_topology().children(ROOT_NODE_INDEX)[0];
        let order: Vec<u8> = h
            .submit_topology()
            .children(submit_node)
            .iter()
            .map(|&n| h.ib_node_index(n).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);

        // Engine view keeps emulation order
        let engine_order: Vec<u8> = h
            .engine_topology()
            .children(submit_node)
            .iter()
            .map(|&n| h.ib_node_index(n).unwrap())
            .collect();
        assert_eq!(engine_order, vec![2, 0, 1]);
    }

    #[test]
    fn test_event_ids_restart_each_pass() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.draw().dispatch().state().draw();
        });
        let capture = make_capture(&s, vec![ib]);
        let mut creator = CommandHierarchyCreator::default();

        let first = creator.create_trees(&capture).unwrap();
        let ids: Vec<u32> = first
            .event_node_indices()
            .iter()
            .map(|&n| first.event_node_id(n).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(first.event_index(first.event_node_indices()[1]), 2);

        let second = creator.create_trees(&capture).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_events_collect_cached_packets() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.state().state().draw().state().wait_for_idle();
        });
        let h = build(&s, vec![ib]);
        let t = h.all_event_topology();
        let submit = first_submit(&h);

        let children = t.children(submit);
        assert_eq!(descs(&h, children), vec!["DrawIndexOffset", "WaitForIdle"]);
        assert_eq!(t.shared_children(children[0]).len(), 3);
        assert_eq!(t.shared_children(children[1]).len(), 2);
        assert_eq!(h.sync_node_sync_type(children[1]).unwrap(), SyncType::WaitForIdle);
        assert_eq!(h.rgp_topology().children(submit), children);
    }

    #[test]
    fn test_sync_from_event_write() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.event_write(event_type::CACHE_INVALIDATE)
                .event_write(event_type::RB_DONE_TS)
                .event_write(event_type::PC_CCU_FLUSH_COLOR_TS);
        });
        let h = build(&s, vec![ib]);
        let t = h.all_event_topology();
        let children = t.children(first_submit(&h));
        assert_eq!(
            descs(&h, children),
            vec!["CacheInvalidate: CACHE_INVALIDATE", "CacheFlush: PC_CCU_FLUSH_COLOR_TS"]
        );
        assert_eq!(h.sync_node_sync_info(children[0]).unwrap(), event_type::CACHE_INVALIDATE);
        // The RB_DONE_TS write is a plain packet folded into the flush
        assert_eq!(t.shared_children(children[1]).len(), 2);
    }

    #[test]
    fn test_postamble_naming() {
        let mut s = StreamBuilder::new();
        let only_state = s.region(|s| {
            s.state().state();
        });
        let h = build(&s, vec![only_state]);
        let t = h.all_event_topology();
        let state = t.children(first_submit(&h))[0];
        assert_eq!(h.node_desc(state).unwrap(), "Postamble State");
        assert_eq!(t.shared_children(state).len(), 2);

        let mut s = StreamBuilder::new();
        let trailing = s.region(|s| {
            s.draw().state();
        });
        let h = build(&s, vec![trailing]);
        let children = h.all_event_topology().children(first_submit(&h));
        assert_eq!(descs(&h, children), vec!["DrawIndexOffset", "State"]);
        assert_eq!(h.node_type(children[1]).unwrap(), NodeType::PostambleState);
    }

    #[test]
    fn test_begin_command_buffer_reparents_events() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.draw().draw().draw();
            s.call(VkCmdId::BeginCommandBuffer, &[0; 4]);
            s.state().draw();
        });
        let h = build(&s, vec![ib]);
        let submit = first_submit(&h);

        for t in [h.all_event_topology(), h.rgp_topology()] {
            let children = t.children(submit);
            assert_eq!(children.len(), 1);
            let marker = children[0];
            assert_eq!(h.node_desc(marker).unwrap(), "vkBeginCommandBuffer");
            let events = t.children(marker);
            assert_eq!(events, h.event_node_indices());
            assert_eq!(t.parent_node_index(events[0]), Some(marker));
        }

        let marker = h.all_event_topology().children(submit)[0];
        assert_eq!(h.marker_node_type(marker).unwrap(), MarkerType::DiveMetadata);
        assert_eq!(h.metadata(marker).unwrap(), &[0, 0, 0, 0]);
        assert!(h.has_vulkan_marker());
        // Packets since the IB start, then everything issued while open
        assert_eq!(h.all_event_topology().shared_children(marker).len(), 6);
    }

    #[test]
    fn test_debug_labels_nest_events() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.label(VkCmdId::CmdBeginDebugUtilsLabelEXT, "Shadow pass");
            s.state().draw();
            s.call(VkCmdId::CmdEndDebugUtilsLabelEXT, &[]);
            s.draw();
        });
        let h = build(&s, vec![ib]);
        let t = h.all_event_topology();
        let children = t.children(first_submit(&h));
        assert_eq!(descs(&h, children), vec!["Shadow pass", "DrawIndexOffset"]);

        let label = children[0];
        assert_eq!(h.marker_node_type(label).unwrap(), MarkerType::BeginEnd);
        assert_eq!(h.marker_node_id(label).unwrap(), 0);
        assert_eq!(t.children(label).len(), 1);
        // State and draw packets issued under the label
        assert_eq!(t.shared_children(label).len(), 2);
    }

    #[test]
    fn test_unbalanced_labels_tolerated() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.call(VkCmdId::CmdEndDebugUtilsLabelEXT, &[]);
            s.label(VkCmdId::CmdDebugMarkerBeginEXT, "open");
            s.draw();
        });
        let mut capture = make_capture(&s, vec![ib]);
        capture.submits.push(capture.submits[0].clone());
        let h = CommandHierarchyCreator::default().create_trees(&capture).unwrap();

        // The label left open in submit 0 does not leak into submit 1
        let t = h.all_event_topology();
        let submits = t.children(ROOT_NODE_INDEX);
        assert_eq!(descs(&h, t.children(submits[1])), vec!["open"]);
        assert_eq!(t.parent_node_index(h.event_node_indices()[1]), Some(t.children(submits[1])[0]));
    }

    #[test]
    fn test_insert_label_is_leaf() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.label(VkCmdId::CmdInsertDebugUtilsLabelEXT, "here");
            s.draw();
        });
        let h = build(&s, vec![ib]);
        let t = h.all_event_topology();
        let children = t.children(first_submit(&h));
        assert_eq!(descs(&h, children), vec!["here", "DrawIndexOffset"]);
        assert_eq!(h.marker_node_type(children[0]).unwrap(), MarkerType::Insert);
    }

    #[test]
    fn test_vulkan_call_and_event_views() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.call(VkCmdId::BeginCommandBuffer, &[]);
            s.call(VkCmdId::CmdBindPipeline, &[]).state();
            s.call(VkCmdId::CmdDraw, &[]).state().draw();
            s.call(VkCmdId::CmdPipelineBarrier, &[]).event_write(event_type::CACHE_FLUSH_TS);
            s.call(VkCmdId::EndCommandBuffer, &[]);
        });
        let h = build(&s, vec![ib]);
        let submit = first_submit(&h);

        assert_eq!(
            descs(&h, h.all_event_topology().children(submit)),
            vec![
                "vkBeginCommandBuffer",
                "vkCmdBindPipeline",
                "vkCmdDraw",
                "vkCmdPipelineBarrier",
                "vkEndCommandBuffer",
                "State"
            ]
        );

        let call = h.vulkan_call_topology();
        let calls = call.children(submit);
        assert_eq!(
            descs(&h, calls),
            vec!["vkBeginCommandBuffer", "vkCmdBindPipeline", "vkCmdDraw", "vkEndCommandBuffer"]
        );
        let draw_call = calls[2];
        assert!(call.children(draw_call).is_empty());
        assert_eq!(call.shared_children(draw_call).len(), 2);

        let event = h.vulkan_event_topology();
        assert_eq!(event.children(submit), &[draw_call]);
        let merged: Vec<u64> = calls[..3]
            .iter()
            .flat_map(|&c| call.shared_children(c).iter().copied())
            .collect();
        assert_eq!(event.shared_children(draw_call), merged.as_slice());
    }

    #[test]
    fn test_secondary_command_buffer() {
        let mut s = StreamBuilder::new();
        let secondary = s.region(|s| {
            s.call(VkCmdId::BeginCommandBuffer, &[]);
            s.call(VkCmdId::CmdDraw, &[]).draw();
            s.call(VkCmdId::EndCommandBuffer, &[]);
        });
        let primary = s.region(|s| {
            s.call(VkCmdId::BeginCommandBuffer, &[]);
            s.call(VkCmdId::CmdExecuteCommands, &[]);
            s.ib(opcode::CP_INDIRECT_BUFFER_PFE, &secondary);
            s.call(VkCmdId::EndCommandBuffer, &[]);
        });
        let h = build(&s, vec![primary]);
        let t = h.all_event_topology();
        let submit = first_submit(&h);

        let top = t.children(submit);
        assert_eq!(
            descs(&h, top),
            vec!["vkBeginCommandBuffer", "vkCmdExecuteCommands", "vkEndCommandBuffer", "State"]
        );
        let inner = t.children(top[1]);
        assert_eq!(
            descs(&h, inner),
            vec!["vkBeginCommandBuffer", "vkCmdDraw", "vkEndCommandBuffer"]
        );
        assert_eq!(t.children(inner[1]), h.event_node_indices());

        // Call IB nests under its caller
        let primary_ib = h.submit_topology().children(submit)[0];
        let call_ib = h.submit_topology().children(primary_ib)[0];
        assert_eq!(h.ib_node_type(call_ib).unwrap(), IbType::Call);
    }

    #[test]
    fn test_chain_nesting_and_flatten() {
        let mut s = StreamBuilder::new();
        let tail = s.region(|s| {
            s.draw();
        });
        let middle = s.region(|s| {
            s.ib(opcode::CP_INDIRECT_BUFFER_CHAIN, &tail);
        });
        let head = s.region(|s| {
            s.state().ib(opcode::CP_INDIRECT_BUFFER_CHAIN, &middle);
        });
        let capture = make_capture(&s, vec![head]);

        let nested = CommandHierarchyCreator::default().create_trees(&capture).unwrap();
        let t = nested.submit_topology();
        let head_node = t.children(first_submit(&nested))[0];
        let middle_node = t.children(head_node)[0];
        assert_eq!(nested.ib_node_type(middle_node).unwrap(), IbType::Chain);
        assert_eq!(t.children(middle_node).len(), 1);

        let options = CreatorOptions {
            flatten_chain_nodes: true,
        };
        let flat = CommandHierarchyCreator::with_options(options)
            .create_trees(&capture)
            .unwrap();
        let t = flat.submit_topology();
        let head_node = t.children(first_submit(&flat))[0];
        let chained = t.children(head_node);
        assert_eq!(chained.len(), 2);
        assert!(chained.iter().all(|&n| flat.ib_node_type(n).unwrap() == IbType::Chain));
    }

    #[test]
    fn test_uncaptured_ib() {
        let mut s = StreamBuilder::new();
        let mut ib = s.region(|s| {
            s.draw();
        });
        ib.skip = true;
        let h = build(&s, vec![ib]);
        let ib_node = h.submit_topology().children(first_submit(&h))[0];
        assert!(h.node_desc(ib_node).unwrap().ends_with(", NOT CAPTURED"));
        assert!(!h.ib_node_is_fully_captured(ib_node).unwrap());
        assert!(h.event_node_indices().is_empty());
    }

    #[test]
    fn test_constant_engine_ibs() {
        let mut s = StreamBuilder::new();
        let ce_callee = s.region(|s| {
            s.state();
        });
        let mut ce = s.region(|s| {
            s.state().ib(opcode::CP_INDIRECT_BUFFER_PFE, &ce_callee);
        });
        ce.is_constant_engine = true;
        let de = s.region(|s| {
            s.state().draw();
        });
        let h = build(&s, vec![ce, de]);
        let t = h.engine_topology();
        let submit = first_submit(&h);

        let ibs = t.children(submit);
        assert_eq!(ibs.len(), 2);
        let (ce_node, de_node) = (ibs[0], ibs[1]);
        let callee_node = t.children(ce_node)[0];
        assert_eq!(h.ib_node_type(callee_node).unwrap(), IbType::Call);

        let ce_packets = t.shared_children(ce_node);
        assert_eq!(ce_packets.len(), 2);
        let callee_packets = t.shared_children(callee_node);
        assert_eq!(callee_packets.len(), 1);
        for &packet in ce_packets.iter().chain(callee_packets) {
            assert!(h.packet_node_is_ce(packet).unwrap());
        }
        let reg = t.children(callee_packets[0])[0];
        assert!(h.reg_field_node_is_ce(reg).unwrap());
        assert!(t.children(reg).iter().all(|&f| h.reg_field_node_is_ce(f).unwrap()));

        // The draw-engine IB is not nested under the constant-engine one
        assert_eq!(t.parent_node_index(de_node), Some(submit));
        assert!(t.children(de_node).is_empty());
        let de_packets = t.shared_children(de_node);
        assert_eq!(de_packets.len(), 2);
        assert!(de_packets.iter().all(|&p| !h.packet_node_is_ce(p).unwrap()));
        assert!(!h.reg_field_node_is_ce(t.children(de_packets[1])[0]).unwrap());
        assert_eq!(h.event_node_indices().len(), 1);
    }

    #[test]
    fn test_ib_target_past_address_space_is_uncaptured() {
        let mut s = StreamBuilder::new();
        s.ib(
            opcode::CP_INDIRECT_BUFFER_PFE,
            &IndirectBufferInfo::new(0xFFFF_FFFF_FFFF_FFF0, 0x100),
        );
        let h = CommandHierarchyCreator::default()
            .create_trees_from_dwords(EngineType::Universal, QueueType::Universal, s.dwords())
            .unwrap();
        let t = h.submit_topology();
        let top = t.children(first_submit(&h))[0];
        let call = t.children(top)[0];
        assert!(h.node_desc(call).unwrap().ends_with(", NOT CAPTURED"));
        assert!(!h.ib_node_is_fully_captured(call).unwrap());
    }

    #[test]
    fn test_memory_failure_fails_pass() {
        let mut s = StreamBuilder::new();
        s.draw();
        let ib = IndirectBufferInfo::new(0, 32);
        let err = CommandHierarchyCreator::default()
            .create_trees(&make_capture(&s, vec![ib]))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::MemoryRead { .. }));
    }

    #[test]
    fn test_presents_follow_their_submit() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.draw();
        });
        let mut capture = make_capture(&s, vec![ib]);
        capture.submits.push(capture.submits[0].clone());
        capture.presents.push(PresentInfo {
            submit_index: 1,
            surface: None,
        });
        capture.presents.push(PresentInfo {
            submit_index: 0,
            surface: Some(PresentSurface {
                full_screen: true,
                engine_type: EngineType::Universal,
                queue_type: QueueType::Universal,
                surface_addr: 0x8000,
                surface_size: 4096,
                vk_format: 44,
                vk_color_space: 0,
            }),
        });
        let h = CommandHierarchyCreator::default().create_trees(&capture).unwrap();
        let roots = h.all_event_topology().children(ROOT_NODE_INDEX);
        let types: Vec<NodeType> = roots.iter().map(|&n| h.node_type(n).unwrap()).collect();
        assert_eq!(
            types,
            vec![NodeType::Submit, NodeType::Present, NodeType::Submit, NodeType::Present]
        );
        assert_eq!(
            h.node_desc(roots[1]).unwrap(),
            "Present: 1, FullScreen: 1, Engine: Universal, Queue: Universal, SurfaceAddr: 0x8000, \
             SurfaceSize: 4096, VkFormat: VK_FORMAT_B8G8R8A8_UNORM, \
             VkColorSpaceKHR: VK_COLOR_SPACE_SRGB_NONLINEAR_KHR"
        );
        assert_eq!(h.node_desc(roots[3]).unwrap(), "Present: 0");
    }

    #[test]
    fn test_skipped_submits_not_emulated() {
        let mut s = StreamBuilder::new();
        let ib = s.region(|s| {
            s.draw();
        });
        let mut capture = make_capture(&s, vec![ib]);
        capture.submits[0].is_dummy_submit = true;
        let mut timer = capture.submits[0].clone();
        timer.is_dummy_submit = false;
        timer.engine_type = EngineType::Timer;
        capture.submits.push(timer);

        let h = CommandHierarchyCreator::default().create_trees(&capture).unwrap();
        assert!(h.event_node_indices().is_empty());
        let submits = h.submit_topology().children(ROOT_NODE_INDEX);
        assert_eq!(submits.len(), 2);
        assert!(h.node_desc(submits[0]).unwrap().ends_with("Dummy Submit: 1"));
        assert!(h.submit_topology().children(submits[1]).is_empty());
    }

    #[test]
    fn test_create_trees_from_dwords() {
        let mut s = StreamBuilder::new();
        s.state().dispatch();
        let h = CommandHierarchyCreator::default()
            .create_trees_from_dwords(EngineType::Compute, QueueType::Compute, s.dwords())
            .unwrap();
        let engines = h.engine_topology().children(ROOT_NODE_INDEX);
        assert_eq!(descs(&h, engines), vec!["Compute"]);
        assert_eq!(h.event_node_indices().len(), 1);
        assert_eq!(h.node_desc(h.event_node_indices()[0]).unwrap(), "Dispatch");

        let err = CommandHierarchyCreator::default()
            .create_trees_from_dwords(EngineType::Timer, QueueType::Timer, s.dwords())
            .unwrap_err();
        assert_eq!(
            err,
            HierarchyError::UnsupportedSubmit {
                engine: EngineType::Timer
            }
        );
    }

    #[test]
    fn test_single_owner_in_every_topology() {
        let mut s = StreamBuilder::new();
        let secondary = s.region(|s| {
            s.call(VkCmdId::BeginCommandBuffer, &[]);
            s.draw();
        });
        let primary = s.region(|s| {
            s.draw();
            s.call(VkCmdId::BeginCommandBuffer, &[]);
            s.label(VkCmdId::CmdBeginDebugUtilsLabelEXT, "pass");
            s.call(VkCmdId::CmdExecuteCommands, &[]);
            s.ib(opcode::CP_INDIRECT_BUFFER_PFD, &secondary);
            s.call(VkCmdId::CmdEndDebugUtilsLabelEXT, &[]);
            s.state();
        });
        let h = build(&s, vec![primary]);
        for t in TopologyType::ALL {
            let topology = h.topology(t);
            let mut owners = vec![0u32; h.num_nodes() as usize];
            for node in 0..topology.num_nodes() {
                for &child in topology.children(node) {
                    owners[child as usize] += 1;
                    assert_eq!(topology.parent_node_index(child), Some(node));
                }
            }
            assert!(owners.iter().all(|&c| c <= 1), "{}", t.name());
            assert_eq!(topology.num_nodes(), h.num_nodes());
        }
    }
}
