//! Elixir Term Conversion Utilities
//!
//! Converts hierarchy nodes and errors to Elixir terms.

use rustler::{Atom, Encoder, Env, NewBinary, Term};

use crate::core::emulator::IbType;
use crate::error::HierarchyError;
use crate::hierarchy::{AuxInfo, CommandHierarchy, MarkerType, NodeType, SyncType, TopologyType};

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    nil,
    // node types
    root,
    engine,
    submit,
    ib,
    packet,
    reg,
    field,
    event,
    marker,
    sync,
    postamble_state,
    present,
    // ib types
    normal,
    call,
    chain,
    // marker types
    begin_end,
    insert,
    barrier,
    dive_metadata,
    // sync types
    wait_for_idle,
    wait_for_me,
    wait_reg_mem,
    wait_mem_writes,
    cache_flush,
    cache_invalidate,
    // errors
    memory_read,
    invariant_violation,
    node_type_mismatch,
    node_out_of_range,
    unsupported_submit,
    unknown_topology,
    unknown_engine,
    unknown_queue,
    bad_length,
    // topologies
    all_event,
    vulkan_call,
    vulkan_event,
    rgp,
}

/// Atom for a node type
pub fn node_type_atom(node_type: NodeType) -> Atom {
    match node_type {
        NodeType::Root => root(),
        NodeType::Engine => engine(),
        NodeType::Submit => submit(),
        NodeType::Ib => ib(),
        NodeType::Packet => packet(),
        NodeType::Reg => reg(),
        NodeType::Field => field(),
        NodeType::DrawDispatchDma => event(),
        NodeType::Marker => marker(),
        NodeType::Sync => sync(),
        NodeType::PostambleState => postamble_state(),
        NodeType::Present => present(),
    }
}

fn ib_type_atom(ib_type: IbType) -> Atom {
    match ib_type {
        IbType::Normal => normal(),
        IbType::Call => call(),
        IbType::Chain => chain(),
    }
}

fn marker_type_atom(marker_type: MarkerType) -> Atom {
    match marker_type {
        MarkerType::BeginEnd => begin_end(),
        MarkerType::Insert => insert(),
        MarkerType::Barrier => barrier(),
        MarkerType::DiveMetadata => dive_metadata(),
    }
}

fn sync_type_atom(sync_type: SyncType) -> Atom {
    match sync_type {
        SyncType::WaitForIdle => wait_for_idle(),
        SyncType::WaitForMe => wait_for_me(),
        SyncType::WaitRegMem => wait_reg_mem(),
        SyncType::WaitMemWrites => wait_mem_writes(),
        SyncType::CacheFlush => cache_flush(),
        SyncType::CacheInvalidate => cache_invalidate(),
    }
}

/// Atom for a topology type
pub fn topology_atom(topology_type: TopologyType) -> Atom {
    match topology_type {
        TopologyType::Engine => engine(),
        TopologyType::Submit => submit(),
        TopologyType::AllEvent => all_event(),
        TopologyType::VulkanCall => vulkan_call(),
        TopologyType::VulkanEvent => vulkan_event(),
        TopologyType::Rgp => rgp(),
    }
}

/// Convert aux info to a tagged tuple, or `nil` when the node has none
pub fn aux_to_term<'a>(env: Env<'a>, aux: &AuxInfo) -> Term<'a> {
    match *aux {
        AuxInfo::None => nil().encode(env),
        AuxInfo::Submit {
            engine_type,
            submit_index,
        } => (submit(), engine_type.name(), submit_index).encode(env),
        AuxInfo::Ib {
            ib_index,
            ib_type,
            size_in_dwords,
            fully_captured,
        } => (ib(), ib_index, ib_type_atom(ib_type), size_in_dwords, fully_captured).encode(env),
        AuxInfo::Packet {
            addr,
            opcode,
            is_ce_packet,
        } => (packet(), addr, opcode, is_ce_packet).encode(env),
        AuxInfo::RegField { is_ce_packet } => (reg(), is_ce_packet).encode(env),
        AuxInfo::Event { event_id } => (event(), event_id).encode(env),
        AuxInfo::Marker { marker_type, id } => (marker(), marker_type_atom(marker_type), id).encode(env),
        AuxInfo::Sync {
            sync_type,
            sync_info,
        } => (sync(), sync_type_atom(sync_type), sync_info).encode(env),
    }
}

/// `{type, description, aux}` for one node
pub fn node_info_to_term<'a>(env: Env<'a>, hierarchy: &CommandHierarchy, node: u64) -> Result<Term<'a>, HierarchyError> {
    let node_type = hierarchy.node_type(node)?;
    let desc = hierarchy.node_desc(node)?;
    let aux = hierarchy.aux_info(node)?;
    Ok((node_type_atom(node_type), str_to_binary(env, desc), aux_to_term(env, aux)).encode(env))
}

/// Convert a list of node indices to an Elixir list
pub fn nodes_to_term<'a>(env: Env<'a>, nodes: &[u64]) -> Term<'a> {
    let mut list = Term::list_new_empty(env);
    for &node in nodes.iter().rev() {
        list = list.list_prepend(node.encode(env));
    }
    list
}

/// `{:error, reason}` for a hierarchy error
pub fn error_to_term<'a>(env: Env<'a>, err: &HierarchyError) -> Term<'a> {
    let reason = match err {
        HierarchyError::MemoryRead {
            submit_index,
            va_addr,
            size,
        } => (memory_read(), *submit_index, *va_addr, *size as u64).encode(env),
        HierarchyError::InvariantViolation(msg) => (invariant_violation(), str_to_binary(env, msg)).encode(env),
        HierarchyError::NodeTypeMismatch { node, .. } => (node_type_mismatch(), *node).encode(env),
        HierarchyError::NodeOutOfRange { node, num_nodes } => (node_out_of_range(), *node, *num_nodes).encode(env),
        HierarchyError::UnsupportedSubmit { engine } => (unsupported_submit(), engine.name()).encode(env),
    };
    (error(), reason).encode(env)
}

/// Convert a string to a binary term (more efficient than .encode())
#[inline]
pub fn str_to_binary<'a>(env: Env<'a>, s: &str) -> Term<'a> {
    bytes_to_binary(env, s.as_bytes())
}

/// Create a binary from bytes
pub fn bytes_to_binary<'a>(env: Env<'a>, bytes: &[u8]) -> Term<'a> {
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}
