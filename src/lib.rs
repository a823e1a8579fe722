//! cmdtree - GPU command-stream hierarchy decoder
//!
//! Decodes captured PM4 command streams into navigable trees:
//! Engine and Submit (capture structure), AllEvent and Rgp (events under
//! debug labels and Vulkan calls), VulkanCall and VulkanEvent (derived views).
//!
//! The library is usable from Rust directly (`hierarchy::CommandHierarchyCreator`)
//! and from Elixir through the NIFs below.
//!
//! The NIFs only build from a single raw command buffer (`build_from_dwords`).
//! Full captures are Rust-only: `CommandHierarchyCreator::create_trees` over a
//! `core::capture::CaptureData` with its submits, presents and metadata
//! version, backed by `core::memory::CaptureMemory` or any other
//! `MemoryReader`.

use rustler::{Atom, Binary, Encoder, Env, NifResult, ResourceArc, Term};

pub mod core;
pub mod error;
pub mod hierarchy;
mod resource;
mod term;

#[cfg(test)]
mod testing;

use crate::core::capture::{EngineType, QueueType};
use hierarchy::{CommandHierarchyCreator, CreatorOptions, TopologyType};
use resource::{HierarchyRef, HierarchyResource};
use term::{bytes_to_binary, error_to_term, node_info_to_term, nodes_to_term, str_to_binary};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "memory_tracking")]
mod tracking {
    use std::alloc::{GlobalAlloc, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    pub static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

    pub struct TrackingAllocator;

    #[cfg(feature = "mimalloc")]
    static UNDERLYING: mimalloc::MiMalloc = mimalloc::MiMalloc;

    #[cfg(not(feature = "mimalloc"))]
    static UNDERLYING: std::alloc::System = std::alloc::System;

    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ptr = UNDERLYING.alloc(layout);
            if !ptr.is_null() {
                let current = ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
                PEAK_ALLOCATED.fetch_max(current, Ordering::Relaxed);
            }
            ptr
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
            UNDERLYING.dealloc(ptr, layout)
        }
    }
}

#[cfg(feature = "memory_tracking")]
#[global_allocator]
static GLOBAL: tracking::TrackingAllocator = tracking::TrackingAllocator;

#[cfg(all(feature = "mimalloc", not(feature = "memory_tracking")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Memory Tracking NIFs
// ============================================================================

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::Ordering;

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory() -> usize {
    tracking::ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    tracking::PEAK_ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    let current = tracking::ALLOCATED.load(Ordering::SeqCst);
    let peak = tracking::PEAK_ALLOCATED.swap(current, Ordering::SeqCst);
    (current, peak)
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    (0, 0)
}

// ============================================================================
// Construction
// ============================================================================

/// Build a hierarchy from one raw command buffer (little-endian DWORDs)
///
/// Returns `{:ok, ref}` or `{:error, reason}`.
#[rustler::nif(schedule = "DirtyCpu")]
fn build_from_dwords<'a>(
    env: Env<'a>,
    engine: &str,
    queue: &str,
    input: Binary<'a>,
    flatten_chain_nodes: bool,
) -> NifResult<Term<'a>> {
    let Some(engine_type) = EngineType::from_name(engine) else {
        return Ok((term::error(), term::unknown_engine()).encode(env));
    };
    let Some(queue_type) = QueueType::from_name(queue) else {
        return Ok((term::error(), term::unknown_queue()).encode(env));
    };
    let bytes = input.as_slice();
    if bytes.len() % 4 != 0 {
        return Ok((term::error(), term::bad_length()).encode(env));
    }
    let dwords: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let options = CreatorOptions { flatten_chain_nodes };
    match CommandHierarchyCreator::with_options(options).create_trees_from_dwords(engine_type, queue_type, &dwords) {
        Ok(hierarchy) => {
            let arc = ResourceArc::new(HierarchyResource::new(hierarchy));
            Ok((term::ok(), arc).encode(env))
        }
        Err(e) => {
            log::debug!("build_from_dwords failed: {e}");
            Ok(error_to_term(env, &e))
        }
    }
}

// ============================================================================
// Node Access
// ============================================================================

#[rustler::nif]
fn node_count(hierarchy: HierarchyRef) -> u64 {
    hierarchy.hierarchy.num_nodes()
}

/// `{:ok, {type, description, aux}}` or `{:error, reason}`
#[rustler::nif]
fn node_info<'a>(env: Env<'a>, hierarchy: HierarchyRef, node: u64) -> NifResult<Term<'a>> {
    match node_info_to_term(env, &hierarchy.hierarchy, node) {
        Ok(info) => Ok((term::ok(), info).encode(env)),
        Err(e) => Ok(error_to_term(env, &e)),
    }
}

/// Metadata bytes of a node (Vulkan call arguments for markers)
#[rustler::nif]
fn node_metadata<'a>(env: Env<'a>, hierarchy: HierarchyRef, node: u64) -> NifResult<Term<'a>> {
    match hierarchy.hierarchy.metadata(node) {
        Ok(bytes) => Ok((term::ok(), bytes_to_binary(env, bytes)).encode(env)),
        Err(e) => Ok(error_to_term(env, &e)),
    }
}

/// Ascending node indices of every draw, dispatch and blit
#[rustler::nif]
fn event_nodes<'a>(env: Env<'a>, hierarchy: HierarchyRef) -> Term<'a> {
    nodes_to_term(env, hierarchy.hierarchy.event_node_indices())
}

#[rustler::nif]
fn has_vulkan_marker(hierarchy: HierarchyRef) -> bool {
    hierarchy.hierarchy.has_vulkan_marker()
}

// ============================================================================
// Topology Navigation
// ============================================================================

fn topology_from_atom(atom: Atom) -> Option<TopologyType> {
    TopologyType::ALL.into_iter().find(|&t| term::topology_atom(t) == atom)
}

/// Resolve the topology atom, or answer `{:error, :unknown_topology}`
fn with_topology<'a, F>(env: Env<'a>, topology: Atom, f: F) -> NifResult<Term<'a>>
where
    F: FnOnce(TopologyType) -> Term<'a>,
{
    match topology_from_atom(topology) {
        Some(t) => Ok(f(t)),
        None => Ok((term::error(), term::unknown_topology()).encode(env)),
    }
}

#[rustler::nif]
fn children<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom, node: u64) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| nodes_to_term(env, hierarchy.view(t).children(node)))
}

#[rustler::nif]
fn shared_children<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom, node: u64) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| nodes_to_term(env, hierarchy.view(t).shared_children(node)))
}

/// Owning parent, `nil` for the root and unowned nodes
#[rustler::nif]
fn parent<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom, node: u64) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| match hierarchy.view(t).parent(node) {
        Some(p) => p.encode(env),
        None => term::nil().encode(env),
    })
}

/// Preorder successor, `nil` at the end of the walk
#[rustler::nif]
fn next_node<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom, node: u64) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| match hierarchy.view(t).topology().next_node_index(node) {
        Some(n) => n.encode(env),
        None => term::nil().encode(env),
    })
}

#[rustler::nif(schedule = "DirtyCpu")]
fn preorder<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| {
        let nodes: Vec<u64> = hierarchy.view(t).preorder().collect();
        nodes_to_term(env, &nodes)
    })
}

/// Indented text rendering of one topology
#[rustler::nif(schedule = "DirtyCpu")]
fn dump<'a>(env: Env<'a>, hierarchy: HierarchyRef, topology: Atom, with_shared: bool) -> NifResult<Term<'a>> {
    with_topology(env, topology, |t| str_to_binary(env, &hierarchy.view(t).dump(with_shared)))
}

// ============================================================================
// NIF Initialization
// ============================================================================

rustler::init!("Elixir.CmdTree.Native");
