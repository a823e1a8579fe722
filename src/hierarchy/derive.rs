//! Derived views
//!
//! The Vulkan-oriented topologies are computed from the AllEvent adjacency
//! after emulation. Both derivations are pure functions over
//! `AdjacencyLists`; node classification is supplied by the caller.

use super::topology::AdjacencyLists;

/// Classification used when collapsing Vulkan call markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Anything that is not a Vulkan call marker (labels, submits, ...)
    NonVulkan,
    /// Vulkan call that does GPU work
    VulkanEvent,
    /// Vulkan call without GPU work of its own (binds, state setters, ...)
    VulkanNonEvent,
}

/// Copy `src` without the nodes matching `filter_out`
///
/// Surviving nodes keep their owned children minus filtered ones, in order,
/// and their shared children unchanged. Filtered nodes end up with no edges.
pub fn filter_topology(src: &AdjacencyLists, filter_out: impl Fn(u64) -> bool) -> AdjacencyLists {
    let mut dst = AdjacencyLists::with_nodes(src.num_nodes());
    for node in 0..src.num_nodes() {
        if filter_out(node) {
            continue;
        }
        let kept: Vec<u64> = src
            .owned(node)
            .iter()
            .copied()
            .filter(|&child| !filter_out(child))
            .collect();
        dst.set_owned(node, kept);
        dst.set_shared(node, src.shared(node).to_vec());
    }
    dst
}

/// Collapse Vulkan calls without GPU work into the following event
///
/// Among each node's children, a `VulkanNonEvent` child is dropped and its
/// shared children carried forward; the next `VulkanEvent` sibling receives
/// them ahead of its own. A `NonVulkan` sibling discards what was carried.
pub fn collapse_topology(src: &AdjacencyLists, classify: impl Fn(u64) -> CallClass) -> AdjacencyLists {
    let mut dst = AdjacencyLists::with_nodes(src.num_nodes());
    for node in 0..src.num_nodes() {
        if classify(node) != CallClass::VulkanNonEvent {
            dst.set_shared(node, src.shared(node).to_vec());
        }
    }

    for node in 0..src.num_nodes() {
        if classify(node) == CallClass::VulkanNonEvent {
            continue;
        }
        let mut carried: Vec<u64> = Vec::new();
        let mut kept = Vec::with_capacity(src.owned(node).len());
        for &child in src.owned(node) {
            match classify(child) {
                CallClass::VulkanNonEvent => carried.extend_from_slice(src.shared(child)),
                CallClass::NonVulkan => {
                    carried.clear();
                    kept.push(child);
                }
                CallClass::VulkanEvent => {
                    if !carried.is_empty() {
                        carried.extend_from_slice(src.shared(child));
                        dst.set_shared(child, std::mem::take(&mut carried));
                    }
                    kept.push(child);
                }
            }
        }
        dst.set_owned(node, kept);
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_adjacency(n: u64, owned: &[(u64, u64)], shared: &[(u64, u64)]) -> AdjacencyLists {
        let mut adj = AdjacencyLists::with_nodes(n);
        for &(p, c) in owned {
            adj.add_child(p, c).unwrap();
        }
        for &(p, c) in shared {
            adj.add_shared_child(p, c).unwrap();
        }
        adj
    }

    #[test]
    fn test_filter_drops_nodes_keeps_order() {
        // 0 -> [1, 2, 3, 4]; 2 and 4 are filtered
        let src = make_adjacency(7, &[(0, 1), (0, 2), (0, 3), (0, 4)], &[(1, 5), (1, 6), (2, 5)]);
        let dst = filter_topology(&src, |n| n == 2 || n == 4);
        assert_eq!(dst.owned(0), &[1, 3]);
        assert_eq!(dst.shared(1), &[5, 6]);
        assert!(dst.shared(2).is_empty());
        assert_eq!(dst.num_nodes(), 7);
    }

    #[test]
    fn test_collapse_merges_forward() {
        // 0 -> [1 bind, 2 bind, 3 draw, 4 label, 5 bind, 6 label]
        // packets 7..=11
        let src = make_adjacency(
            12,
            &[(0, 1), (0, 2), (0, 3), (0, 4), (0, 5), (0, 6)],
            &[(1, 7), (2, 8), (3, 9), (5, 10), (6, 11)],
        );
        let classify = |n: u64| match n {
            1 | 2 | 5 => CallClass::VulkanNonEvent,
            3 => CallClass::VulkanEvent,
            _ => CallClass::NonVulkan,
        };
        let dst = collapse_topology(&src, classify);
        assert_eq!(dst.owned(0), &[3, 4, 6]);
        assert_eq!(dst.shared(3), &[7, 8, 9]);
        // Carried packets from 5 are discarded at the label
        assert_eq!(dst.shared(6), &[11]);
        assert!(dst.shared(1).is_empty());
    }

    #[test]
    fn test_collapse_keeps_own_list_without_carry() {
        let src = make_adjacency(4, &[(0, 1), (0, 2)], &[(1, 3), (2, 3)]);
        let dst = collapse_topology(&src, |n| match n {
            1 | 2 => CallClass::VulkanEvent,
            _ => CallClass::NonVulkan,
        });
        assert_eq!(dst.owned(0), &[1, 2]);
        assert_eq!(dst.shared(2), &[3]);
    }

    #[test]
    fn test_collapse_nested_under_label() {
        // 0 -> [1 label]; 1 -> [2 bind, 3 dispatch]
        let src = make_adjacency(6, &[(0, 1), (1, 2), (1, 3)], &[(2, 4), (3, 5)]);
        let dst = collapse_topology(&src, |n| match n {
            2 => CallClass::VulkanNonEvent,
            3 => CallClass::VulkanEvent,
            _ => CallClass::NonVulkan,
        });
        assert_eq!(dst.owned(1), &[3]);
        assert_eq!(dst.shared(3), &[4, 5]);
    }
}
