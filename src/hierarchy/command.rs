//! CommandHierarchy - finished, read-only result of a build pass
//!
//! Owns the node store, the six baked topologies and the ascending list of
//! event node indices. Typed accessors check the node's aux variant.

use super::node::{AuxInfo, MarkerType, NodeType, Nodes, SyncType};
use super::topology::Topology;
use crate::core::capture::EngineType;
use crate::core::emulator::IbType;
use crate::error::{HierarchyError, Result};

/// The views built over the node index space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyType {
    /// Root > Engine > Submit > IB > IB... (packets shared)
    Engine,
    /// Root > Submit > IB > IB... (packets shared)
    Submit,
    /// Root > Submit > markers > events (packets shared)
    AllEvent,
    /// AllEvent without events, syncs, postambles and barriers
    VulkanCall,
    /// VulkanCall with non-event calls folded into the next event
    VulkanEvent,
    /// AllEvent nesting driven by the internal marker stack
    Rgp,
}

impl TopologyType {
    pub const COUNT: usize = 6;

    pub const ALL: [TopologyType; TopologyType::COUNT] = [
        TopologyType::Engine,
        TopologyType::Submit,
        TopologyType::AllEvent,
        TopologyType::VulkanCall,
        TopologyType::VulkanEvent,
        TopologyType::Rgp,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TopologyType::Engine => "engine",
            TopologyType::Submit => "submit",
            TopologyType::AllEvent => "all_event",
            TopologyType::VulkanCall => "vulkan_call",
            TopologyType::VulkanEvent => "vulkan_event",
            TopologyType::Rgp => "rgp",
        }
    }

    pub fn from_name(name: &str) -> Option<TopologyType> {
        TopologyType::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Decoded command hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHierarchy {
    nodes: Nodes,
    topologies: [Topology; TopologyType::COUNT],
    /// Ascending node indices of DrawDispatchDma nodes
    event_node_indices: Vec<u64>,
    metadata_version: u32,
    has_vulkan_marker: bool,
}

impl CommandHierarchy {
    pub(crate) fn new(
        nodes: Nodes,
        topologies: [Topology; TopologyType::COUNT],
        event_node_indices: Vec<u64>,
        metadata_version: u32,
        has_vulkan_marker: bool,
    ) -> Self {
        Self {
            nodes,
            topologies,
            event_node_indices,
            metadata_version,
            has_vulkan_marker,
        }
    }

    // ========================================================================
    // Topologies
    // ========================================================================

    #[inline]
    pub fn topology(&self, topology_type: TopologyType) -> &Topology {
        &self.topologies[topology_type.index()]
    }

    #[inline]
    pub fn engine_topology(&self) -> &Topology {
        self.topology(TopologyType::Engine)
    }

    #[inline]
    pub fn submit_topology(&self) -> &Topology {
        self.topology(TopologyType::Submit)
    }

    #[inline]
    pub fn all_event_topology(&self) -> &Topology {
        self.topology(TopologyType::AllEvent)
    }

    #[inline]
    pub fn vulkan_call_topology(&self) -> &Topology {
        self.topology(TopologyType::VulkanCall)
    }

    #[inline]
    pub fn vulkan_event_topology(&self) -> &Topology {
        self.topology(TopologyType::VulkanEvent)
    }

    #[inline]
    pub fn rgp_topology(&self) -> &Topology {
        self.topology(TopologyType::Rgp)
    }

    // ========================================================================
    // Plain accessors
    // ========================================================================

    #[inline]
    pub fn num_nodes(&self) -> u64 {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Get the type of a node
    pub fn node_type(&self, node: u64) -> Result<NodeType> {
        self.nodes.node_type(node).ok_or_else(|| self.out_of_range(node))
    }

    /// Get the display string of a node
    pub fn node_desc(&self, node: u64) -> Result<&str> {
        self.nodes.description(node).ok_or_else(|| self.out_of_range(node))
    }

    /// Get the metadata bytes of a node (empty when none were recorded)
    pub fn metadata(&self, node: u64) -> Result<&[u8]> {
        self.nodes.metadata(node).ok_or_else(|| self.out_of_range(node))
    }

    pub fn aux_info(&self, node: u64) -> Result<&AuxInfo> {
        self.nodes.aux_info(node).ok_or_else(|| self.out_of_range(node))
    }

    #[inline]
    pub fn metadata_version(&self) -> u32 {
        self.metadata_version
    }

    /// True if any Vulkan call marker was decoded
    #[inline]
    pub fn has_vulkan_marker(&self) -> bool {
        self.has_vulkan_marker
    }

    /// Ascending node indices of all event nodes
    #[inline]
    pub fn event_node_indices(&self) -> &[u64] {
        &self.event_node_indices
    }

    /// 1-based rank of an event node, 0 if `node` is not an event
    pub fn event_index(&self, node: u64) -> u64 {
        match self.event_node_indices.binary_search(&node) {
            Ok(pos) => pos as u64 + 1,
            Err(_) => 0,
        }
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    pub fn submit_node_engine_type(&self, node: u64) -> Result<EngineType> {
        match self.typed(node, NodeType::Submit)? {
            AuxInfo::Submit { engine_type, .. } => Ok(*engine_type),
            _ => Err(self.mismatch(node, NodeType::Submit)),
        }
    }

    pub fn submit_node_index(&self, node: u64) -> Result<u32> {
        match self.typed(node, NodeType::Submit)? {
            AuxInfo::Submit { submit_index, .. } => Ok(*submit_index),
            _ => Err(self.mismatch(node, NodeType::Submit)),
        }
    }

    pub fn ib_node_index(&self, node: u64) -> Result<u8> {
        match self.typed(node, NodeType::Ib)? {
            AuxInfo::Ib { ib_index, .. } => Ok(*ib_index),
            _ => Err(self.mismatch(node, NodeType::Ib)),
        }
    }

    pub fn ib_node_type(&self, node: u64) -> Result<IbType> {
        match self.typed(node, NodeType::Ib)? {
            AuxInfo::Ib { ib_type, .. } => Ok(*ib_type),
            _ => Err(self.mismatch(node, NodeType::Ib)),
        }
    }

    pub fn ib_node_size_in_dwords(&self, node: u64) -> Result<u32> {
        match self.typed(node, NodeType::Ib)? {
            AuxInfo::Ib { size_in_dwords, .. } => Ok(*size_in_dwords),
            _ => Err(self.mismatch(node, NodeType::Ib)),
        }
    }

    pub fn ib_node_is_fully_captured(&self, node: u64) -> Result<bool> {
        match self.typed(node, NodeType::Ib)? {
            AuxInfo::Ib { fully_captured, .. } => Ok(*fully_captured),
            _ => Err(self.mismatch(node, NodeType::Ib)),
        }
    }

    pub fn marker_node_type(&self, node: u64) -> Result<MarkerType> {
        match self.typed(node, NodeType::Marker)? {
            AuxInfo::Marker { marker_type, .. } => Ok(*marker_type),
            _ => Err(self.mismatch(node, NodeType::Marker)),
        }
    }

    pub fn marker_node_id(&self, node: u64) -> Result<u32> {
        match self.typed(node, NodeType::Marker)? {
            AuxInfo::Marker { id, .. } => Ok(*id),
            _ => Err(self.mismatch(node, NodeType::Marker)),
        }
    }

    pub fn event_node_id(&self, node: u64) -> Result<u32> {
        match self.typed(node, NodeType::DrawDispatchDma)? {
            AuxInfo::Event { event_id } => Ok(*event_id),
            _ => Err(self.mismatch(node, NodeType::DrawDispatchDma)),
        }
    }

    pub fn packet_node_addr(&self, node: u64) -> Result<u64> {
        match self.typed(node, NodeType::Packet)? {
            AuxInfo::Packet { addr, .. } => Ok(*addr),
            _ => Err(self.mismatch(node, NodeType::Packet)),
        }
    }

    pub fn packet_node_opcode(&self, node: u64) -> Result<u8> {
        match self.typed(node, NodeType::Packet)? {
            AuxInfo::Packet { opcode, .. } => Ok(*opcode),
            _ => Err(self.mismatch(node, NodeType::Packet)),
        }
    }

    pub fn packet_node_is_ce(&self, node: u64) -> Result<bool> {
        match self.typed(node, NodeType::Packet)? {
            AuxInfo::Packet { is_ce_packet, .. } => Ok(*is_ce_packet),
            _ => Err(self.mismatch(node, NodeType::Packet)),
        }
    }

    /// Constant-engine flag of a Reg or Field node
    pub fn reg_field_node_is_ce(&self, node: u64) -> Result<bool> {
        let found = self.node_type(node)?;
        match (found, self.aux_info(node)?) {
            (NodeType::Reg | NodeType::Field, AuxInfo::RegField { is_ce_packet }) => Ok(*is_ce_packet),
            _ => Err(self.mismatch(node, NodeType::Reg)),
        }
    }

    pub fn sync_node_sync_type(&self, node: u64) -> Result<SyncType> {
        match self.typed(node, NodeType::Sync)? {
            AuxInfo::Sync { sync_type, .. } => Ok(*sync_type),
            _ => Err(self.mismatch(node, NodeType::Sync)),
        }
    }

    pub fn sync_node_sync_info(&self, node: u64) -> Result<u32> {
        match self.typed(node, NodeType::Sync)? {
            AuxInfo::Sync { sync_info, .. } => Ok(*sync_info),
            _ => Err(self.mismatch(node, NodeType::Sync)),
        }
    }

    /// Aux info of `node` if it is of type `expected`
    fn typed(&self, node: u64, expected: NodeType) -> Result<&AuxInfo> {
        let found = self.node_type(node)?;
        if found != expected {
            return Err(HierarchyError::NodeTypeMismatch {
                node,
                expected,
                found,
            });
        }
        self.aux_info(node)
    }

    fn mismatch(&self, node: u64, expected: NodeType) -> HierarchyError {
        HierarchyError::NodeTypeMismatch {
            node,
            expected,
            found: self.nodes.node_type(node).unwrap_or(expected),
        }
    }

    fn out_of_range(&self, node: u64) -> HierarchyError {
        HierarchyError::NodeOutOfRange {
            node,
            num_nodes: self.nodes.len(),
        }
    }
}
