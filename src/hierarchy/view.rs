//! Topology View
//!
//! Pairs a CommandHierarchy with one of its topologies so callers can walk
//! a single view without passing the topology type around.

use std::fmt::Write;

use super::command::{CommandHierarchy, TopologyType};
use super::topology::{PreorderIter, Topology, ROOT_NODE_INDEX};

/// One topology of a hierarchy, with node data at hand
#[derive(Clone, Copy)]
pub struct TopologyView<'a> {
    pub hierarchy: &'a CommandHierarchy,
    pub topology_type: TopologyType,
}

impl<'a> TopologyView<'a> {
    /// Create a new view
    pub fn new(hierarchy: &'a CommandHierarchy, topology_type: TopologyType) -> Self {
        Self {
            hierarchy,
            topology_type,
        }
    }

    #[inline]
    pub fn topology(&self) -> &'a Topology {
        self.hierarchy.topology(self.topology_type)
    }

    #[inline]
    pub fn children(&self, node: u64) -> &'a [u64] {
        self.topology().children(node)
    }

    #[inline]
    pub fn shared_children(&self, node: u64) -> &'a [u64] {
        self.topology().shared_children(node)
    }

    #[inline]
    pub fn parent(&self, node: u64) -> Option<u64> {
        self.topology().parent_node_index(node)
    }

    /// Nodes reachable from the root, in preorder
    #[inline]
    pub fn preorder(&self) -> PreorderIter<'a> {
        self.topology().preorder()
    }

    /// Distance from the root; 0 for the root and for unowned nodes
    pub fn depth(&self, node: u64) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Owning ancestors of `node`, nearest first, ending at the root
    pub fn ancestors(&self, node: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Get the description of `node`, empty when out of range
    #[inline]
    pub fn desc(&self, node: u64) -> &'a str {
        self.hierarchy.node_desc(node).unwrap_or("")
    }

    /// Indented text of the owned tree below the root, one node per line
    ///
    /// With `with_shared`, each node's shared children follow it, marked `*`.
    pub fn dump(&self, with_shared: bool) -> String {
        let mut out = String::new();
        let mut stack: Vec<(u64, usize)> = self
            .children(ROOT_NODE_INDEX)
            .iter()
            .rev()
            .map(|&c| (c, 0))
            .collect();
        while let Some((node, level)) = stack.pop() {
            let _ = writeln!(out, "{:indent$}{}", "", self.desc(node), indent = level * 2);
            if with_shared {
                for &shared in self.shared_children(node) {
                    let _ = writeln!(out, "{:indent$}* {}", "", self.desc(shared), indent = level * 2 + 2);
                }
            }
            stack.extend(self.children(node).iter().rev().map(|&c| (c, level + 1)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::{EngineType, QueueType};
    use crate::core::vulkan::VkCmdId;
    use crate::hierarchy::builder::CommandHierarchyCreator;
    use crate::testing::StreamBuilder;

    fn make_test_hierarchy() -> CommandHierarchy {
        let mut s = StreamBuilder::new();
        s.label(VkCmdId::CmdBeginDebugUtilsLabelEXT, "frame");
        s.state().draw();
        s.call(VkCmdId::CmdEndDebugUtilsLabelEXT, &[]);
        s.dispatch();
        CommandHierarchyCreator::default()
            .create_trees_from_dwords(EngineType::Universal, QueueType::Universal, s.dwords())
            .unwrap()
    }

    #[test]
    fn test_dump_all_event() {
        let h = make_test_hierarchy();
        let view = TopologyView::new(&h, TopologyType::AllEvent);
        let dump = view.dump(false);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Submit: 0"));
        assert_eq!(&lines[1..], &["  frame", "    DrawIndexOffset", "  Dispatch"]);
    }

    #[test]
    fn test_dump_with_shared() {
        let h = make_test_hierarchy();
        let view = TopologyView::new(&h, TopologyType::AllEvent);
        let dump = view.dump(true);
        assert!(dump.contains("      * TYPE4 REGWRITE 0x"));
    }

    #[test]
    fn test_depth_and_ancestors() {
        let h = make_test_hierarchy();
        let view = TopologyView::new(&h, TopologyType::AllEvent);
        let draw = h.event_node_indices()[0];
        assert_eq!(view.depth(draw), 3);
        let ancestors = view.ancestors(draw);
        assert_eq!(ancestors.len(), 3);
        assert_eq!(view.desc(ancestors[0]), "frame");
        assert_eq!(*ancestors.last().unwrap(), ROOT_NODE_INDEX);
        assert_eq!(view.depth(ROOT_NODE_INDEX), 0);
    }

    #[test]
    fn test_preorder_matches_dump_order() {
        let h = make_test_hierarchy();
        let view = TopologyView::new(&h, TopologyType::Submit);
        let visited: Vec<u64> = view.preorder().collect();
        assert_eq!(visited[0], ROOT_NODE_INDEX);
        // Root, submit, IB
        assert_eq!(visited.len(), 3);
        assert_eq!(view.dump(false).lines().count(), 2);
    }
}
