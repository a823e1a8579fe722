//! Node Store Types
//!
//! Every node of the hierarchy lives in one dense, append-only index
//! space shared by all topologies. Per-node data is kept in parallel
//! arrays; the aux info is a sum type with one variant per node kind.

use crate::core::capture::EngineType;
use crate::core::emulator::IbType;
use crate::error::{HierarchyError, Result};

/// Bits available for a submit-level IB index
pub const MAX_NUM_IBS_BITS: u32 = 8;

/// Packet addresses are 48-bit GPU virtual addresses
pub const PACKET_ADDR_BITS: u32 = 48;

/// Kind of a hierarchy node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Engine,
    Submit,
    Ib,
    Packet,
    Reg,
    Field,
    /// Draw, dispatch or blit
    DrawDispatchDma,
    Marker,
    Sync,
    PostambleState,
    Present,
}

impl NodeType {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::Engine => "engine",
            NodeType::Submit => "submit",
            NodeType::Ib => "ib",
            NodeType::Packet => "packet",
            NodeType::Reg => "reg",
            NodeType::Field => "field",
            NodeType::DrawDispatchDma => "event",
            NodeType::Marker => "marker",
            NodeType::Sync => "sync",
            NodeType::PostambleState => "postamble_state",
            NodeType::Present => "present",
        }
    }
}

/// Origin of a Marker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerType {
    /// Debug label with begin and end
    BeginEnd,
    /// Single-point debug label
    Insert,
    /// Pipeline barrier call
    Barrier,
    /// Any other Vulkan call recorded by the capture layer
    DiveMetadata,
}

/// Synchronisation performed by a Sync node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    WaitForIdle,
    WaitForMe,
    WaitRegMem,
    WaitMemWrites,
    CacheFlush,
    CacheInvalidate,
}

impl SyncType {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            SyncType::WaitForIdle => "WaitForIdle",
            SyncType::WaitForMe => "WaitForMe",
            SyncType::WaitRegMem => "WaitRegMem",
            SyncType::WaitMemWrites => "WaitMemWrites",
            SyncType::CacheFlush => "CacheFlush",
            SyncType::CacheInvalidate => "CacheInvalidate",
        }
    }
}

/// Per-node auxiliary data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxInfo {
    None,
    Submit {
        engine_type: EngineType,
        submit_index: u32,
    },
    Ib {
        ib_index: u8,
        ib_type: IbType,
        size_in_dwords: u32,
        fully_captured: bool,
    },
    Packet {
        addr: u64,
        /// `TYPE4_OPCODE` for Type4 packets
        opcode: u8,
        is_ce_packet: bool,
    },
    /// Reg and Field nodes
    RegField {
        is_ce_packet: bool,
    },
    Event {
        event_id: u32,
    },
    Marker {
        marker_type: MarkerType,
        id: u32,
    },
    Sync {
        sync_type: SyncType,
        sync_info: u32,
    },
}

impl AuxInfo {
    /// IB aux info; the index must fit in `MAX_NUM_IBS_BITS`
    pub fn ib(ib_index: u32, ib_type: IbType, size_in_dwords: u32, fully_captured: bool) -> Result<Self> {
        if ib_index >= (1 << MAX_NUM_IBS_BITS) {
            return Err(HierarchyError::invariant(format!(
                "IB index {ib_index} does not fit in {MAX_NUM_IBS_BITS} bits"
            )));
        }
        Ok(AuxInfo::Ib {
            ib_index: ib_index as u8,
            ib_type,
            size_in_dwords,
            fully_captured,
        })
    }

    /// Packet aux info; the address must fit in `PACKET_ADDR_BITS`
    pub fn packet(addr: u64, opcode: u8, is_ce_packet: bool) -> Result<Self> {
        if addr >> PACKET_ADDR_BITS != 0 {
            return Err(HierarchyError::invariant(format!(
                "packet address 0x{addr:x} wider than {PACKET_ADDR_BITS} bits"
            )));
        }
        Ok(AuxInfo::Packet {
            addr,
            opcode,
            is_ce_packet,
        })
    }
}

/// Parallel per-node arrays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nodes {
    node_types: Vec<NodeType>,
    descriptions: Vec<String>,
    aux_infos: Vec<AuxInfo>,
    metadata: Vec<Vec<u8>>,
}

impl Nodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node to every array and return its index
    pub fn add_node(&mut self, node_type: NodeType, desc: String, aux_info: AuxInfo, metadata: &[u8]) -> u64 {
        let idx = self.node_types.len() as u64;
        self.node_types.push(node_type);
        self.descriptions.push(desc);
        self.aux_infos.push(aux_info);
        self.metadata.push(metadata.to_vec());
        debug_assert_eq!(self.descriptions.len(), self.node_types.len());
        debug_assert_eq!(self.aux_infos.len(), self.node_types.len());
        debug_assert_eq!(self.metadata.len(), self.node_types.len());
        idx
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.node_types.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty()
    }

    #[inline]
    pub fn node_type(&self, node: u64) -> Option<NodeType> {
        self.node_types.get(node as usize).copied()
    }

    #[inline]
    pub fn description(&self, node: u64) -> Option<&str> {
        self.descriptions.get(node as usize).map(String::as_str)
    }

    #[inline]
    pub fn aux_info(&self, node: u64) -> Option<&AuxInfo> {
        self.aux_infos.get(node as usize)
    }

    #[inline]
    pub fn metadata(&self, node: u64) -> Option<&[u8]> {
        self.metadata.get(node as usize).map(Vec::as_slice)
    }

    /// Get the IB index of an Ib node
    #[inline]
    pub fn ib_index(&self, node: u64) -> Option<u8> {
        match self.aux_info(node)? {
            AuxInfo::Ib { ib_index, .. } => Some(*ib_index),
            _ => None,
        }
    }

    /// Get the IB type of an Ib node
    #[inline]
    pub fn ib_type(&self, node: u64) -> Option<IbType> {
        match self.aux_info(node)? {
            AuxInfo::Ib { ib_type, .. } => Some(*ib_type),
            _ => None,
        }
    }

    /// Get the marker type of a Marker node
    #[inline]
    pub fn marker_type(&self, node: u64) -> Option<MarkerType> {
        match self.aux_info(node)? {
            AuxInfo::Marker { marker_type, .. } => Some(*marker_type),
            _ => None,
        }
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.node_types.shrink_to_fit();
        self.descriptions.shrink_to_fit();
        self.aux_infos.shrink_to_fit();
        self.metadata.shrink_to_fit();
    }

    /// Approximate heap footprint in bytes
    pub fn heap_size(&self) -> usize {
        self.node_types.capacity() * std::mem::size_of::<NodeType>()
            + self.aux_infos.capacity() * std::mem::size_of::<AuxInfo>()
            + self.descriptions.iter().map(String::capacity).sum::<usize>()
            + self.metadata.iter().map(Vec::capacity).sum::<usize>()
    }
}
