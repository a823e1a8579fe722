//! Construction and query errors
//!
//! A build pass either fully succeeds or fails with one of these; callers
//! never observe a partially built hierarchy.

use thiserror::Error;

use crate::core::capture::EngineType;
use crate::hierarchy::node::NodeType;

/// Errors produced while building or querying a command hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    /// The memory reader could not supply the requested range
    #[error("memory read failed: submit {submit_index}, va 0x{va_addr:x}, {size} bytes")]
    MemoryRead {
        submit_index: u32,
        va_addr: u64,
        size: usize,
    },

    /// A structural invariant of the builder or a topology was broken
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A typed accessor was called on a node of another type
    #[error("node {node} is {found:?}, expected {expected:?}")]
    NodeTypeMismatch {
        node: u64,
        expected: NodeType,
        found: NodeType,
    },

    /// A node index past the end of the node store
    #[error("node {node} out of range ({num_nodes} nodes)")]
    NodeOutOfRange { node: u64, num_nodes: u64 },

    /// The single-buffer path only decodes gfx, compute and DMA submits
    #[error("submit on {engine:?} engine cannot be decoded")]
    UnsupportedSubmit { engine: EngineType },
}

impl HierarchyError {
    #[inline]
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        HierarchyError::InvariantViolation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HierarchyError>;
