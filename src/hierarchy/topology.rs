//! Topology - CSR forest over the shared node index space
//!
//! One topology is one view of the hierarchy. Each node has at most one
//! owning parent (owned children) and any number of shared children that
//! do not affect parent links, so a packet can be listed under many events.
//!
//! Built in two phases:
//! - `AdjacencyLists`: growable per-node lists filled while emulating
//! - `Topology`: flat CSR arrays baked from a finished adjacency set

use crate::error::{HierarchyError, Result};

/// Root node index in every topology
pub const ROOT_NODE_INDEX: u64 = 0;

/// Parent/child-index value for nodes without an owner
pub const NO_NODE: u64 = u64::MAX;

/// Compact parent/child view of the hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// (start, count) into `children_data` for each node
    children_ranges: Vec<(u64, u64)>,
    children_data: Vec<u64>,
    /// (start, count) into `shared_data` for each node
    shared_ranges: Vec<(u64, u64)>,
    shared_data: Vec<u64>,
    /// Owning parent, `NO_NODE` for the root and unowned nodes
    parents: Vec<u64>,
    /// Rank among the owning parent's children
    child_indices: Vec<u64>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to `num_nodes` nodes with no edges
    pub fn set_num_nodes(&mut self, num_nodes: u64) {
        let n = num_nodes as usize;
        self.children_ranges = vec![(0, 0); n];
        self.children_data.clear();
        self.shared_ranges = vec![(0, 0); n];
        self.shared_data.clear();
        self.parents = vec![NO_NODE; n];
        self.child_indices = vec![NO_NODE; n];
    }

    /// Set the owned children of `node` and their back pointers
    ///
    /// Allowed once per node; each child may only ever have one owner.
    pub fn add_children(&mut self, node: u64, children: &[u64]) -> Result<()> {
        self.check_node(node)?;
        if self.children_ranges[node as usize].1 != 0 {
            return Err(HierarchyError::invariant(format!(
                "node {node} already has owned children"
            )));
        }
        for (rank, &child) in children.iter().enumerate() {
            self.check_node(child)?;
            let slot = child as usize;
            if self.parents[slot] != NO_NODE {
                return Err(HierarchyError::invariant(format!(
                    "node {child} already owned by {}, cannot add to {node}",
                    self.parents[slot]
                )));
            }
            self.parents[slot] = node;
            self.child_indices[slot] = rank as u64;
        }
        let start = self.children_data.len() as u64;
        self.children_data.extend_from_slice(children);
        self.children_ranges[node as usize] = (start, children.len() as u64);
        Ok(())
    }

    /// Set the shared children of `node`; parents are left untouched
    pub fn add_shared_children(&mut self, node: u64, children: &[u64]) -> Result<()> {
        self.check_node(node)?;
        if self.shared_ranges[node as usize].1 != 0 {
            return Err(HierarchyError::invariant(format!(
                "node {node} already has shared children"
            )));
        }
        if let Some(&bad) = children.iter().find(|&&c| c >= self.num_nodes()) {
            return Err(HierarchyError::invariant(format!(
                "shared child {bad} out of range"
            )));
        }
        let start = self.shared_data.len() as u64;
        self.shared_data.extend_from_slice(children);
        self.shared_ranges[node as usize] = (start, children.len() as u64);
        Ok(())
    }

    /// Bake a finished adjacency set
    pub fn from_adjacency(adjacency: &AdjacencyLists) -> Result<Topology> {
        let mut topology = Topology::new();
        topology.set_num_nodes(adjacency.num_nodes());
        topology.children_data.reserve(adjacency.num_owned_edges());
        topology.shared_data.reserve(adjacency.num_shared_edges());
        for node in 0..adjacency.num_nodes() {
            let owned = adjacency.owned(node);
            if !owned.is_empty() {
                topology.add_children(node, owned)?;
            }
            let shared = adjacency.shared(node);
            if !shared.is_empty() {
                topology.add_shared_children(node, shared)?;
            }
        }
        Ok(topology)
    }

    #[inline]
    fn check_node(&self, node: u64) -> Result<()> {
        if node >= self.num_nodes() {
            return Err(HierarchyError::invariant(format!(
                "node {node} out of range ({} nodes)",
                self.num_nodes()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[inline]
    pub fn num_nodes(&self) -> u64 {
        self.parents.len() as u64
    }

    #[inline]
    pub fn num_children(&self, node: u64) -> u64 {
        self.children_ranges
            .get(node as usize)
            .map_or(0, |&(_, count)| count)
    }

    /// Get the `rank`-th owned child
    #[inline]
    pub fn child_node_index(&self, node: u64, rank: u64) -> Option<u64> {
        self.children(node).get(rank as usize).copied()
    }

    #[inline]
    pub fn num_shared_children(&self, node: u64) -> u64 {
        self.shared_ranges
            .get(node as usize)
            .map_or(0, |&(_, count)| count)
    }

    /// Get the `rank`-th shared child
    #[inline]
    pub fn shared_child_node_index(&self, node: u64, rank: u64) -> Option<u64> {
        self.shared_children(node).get(rank as usize).copied()
    }

    /// Get the owning parent
    #[inline]
    pub fn parent_node_index(&self, node: u64) -> Option<u64> {
        self.parents
            .get(node as usize)
            .copied()
            .filter(|&p| p != NO_NODE)
    }

    /// Get the rank among the owning parent's children
    #[inline]
    pub fn child_index(&self, node: u64) -> Option<u64> {
        self.child_indices
            .get(node as usize)
            .copied()
            .filter(|&i| i != NO_NODE)
    }

    /// Owned children in order
    #[inline]
    pub fn children(&self, node: u64) -> &[u64] {
        match self.children_ranges.get(node as usize) {
            Some(&(start, count)) => &self.children_data[start as usize..(start + count) as usize],
            None => &[],
        }
    }

    /// Shared children in order
    #[inline]
    pub fn shared_children(&self, node: u64) -> &[u64] {
        match self.shared_ranges.get(node as usize) {
            Some(&(start, count)) => &self.shared_data[start as usize..(start + count) as usize],
            None => &[],
        }
    }

    /// Total owned edges
    #[inline]
    pub fn num_owned_edges(&self) -> usize {
        self.children_data.len()
    }

    #[inline]
    pub fn num_shared_edges(&self) -> usize {
        self.shared_data.len()
    }

    /// Preorder successor of `node` over owned edges
    ///
    /// First child if any, else the next sibling of the nearest ancestor
    /// that has one. `None` once the walk climbs back to the root.
    pub fn next_node_index(&self, node: u64) -> Option<u64> {
        if let Some(&first) = self.children(node).first() {
            return Some(first);
        }
        let mut current = node;
        while current != ROOT_NODE_INDEX {
            let parent = self.parent_node_index(current)?;
            let rank = self.child_index(current)?;
            if let Some(sibling) = self.child_node_index(parent, rank + 1) {
                return Some(sibling);
            }
            current = parent;
        }
        None
    }

    /// Iterate nodes reachable from the root in preorder
    pub fn preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            topology: self,
            next: (self.num_nodes() > 0).then_some(ROOT_NODE_INDEX),
        }
    }

    /// Release unused capacity
    pub(crate) fn shrink_to_fit(&mut self) {
        self.children_ranges.shrink_to_fit();
        self.children_data.shrink_to_fit();
        self.shared_ranges.shrink_to_fit();
        self.shared_data.shrink_to_fit();
        self.parents.shrink_to_fit();
        self.child_indices.shrink_to_fit();
    }
}

/// Preorder walk driven by `Topology::next_node_index`
pub struct PreorderIter<'a> {
    topology: &'a Topology,
    next: Option<u64>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        self.next = self.topology.next_node_index(current);
        Some(current)
    }
}

// ============================================================================
// AdjacencyLists
// ============================================================================

/// Growable per-node child lists for one topology under construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyLists {
    owned: Vec<Vec<u64>>,
    shared: Vec<Vec<u64>>,
}

impl AdjacencyLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists for `num_nodes` nodes with no edges
    pub fn with_nodes(num_nodes: u64) -> Self {
        Self {
            owned: vec![Vec::new(); num_nodes as usize],
            shared: vec![Vec::new(); num_nodes as usize],
        }
    }

    /// Grow by one node
    #[inline]
    pub fn push_node(&mut self) {
        self.owned.push(Vec::new());
        self.shared.push(Vec::new());
    }

    #[inline]
    pub fn num_nodes(&self) -> u64 {
        self.owned.len() as u64
    }

    pub fn add_child(&mut self, node: u64, child: u64) -> Result<()> {
        self.check_edge(node, child)?;
        self.owned[node as usize].push(child);
        Ok(())
    }

    pub fn add_shared_child(&mut self, node: u64, child: u64) -> Result<()> {
        self.check_edge(node, child)?;
        self.shared[node as usize].push(child);
        Ok(())
    }

    #[inline]
    pub fn owned(&self, node: u64) -> &[u64] {
        self.owned.get(node as usize).map_or(&[], Vec::as_slice)
    }

    #[inline]
    pub fn shared(&self, node: u64) -> &[u64] {
        self.shared.get(node as usize).map_or(&[], Vec::as_slice)
    }

    #[inline]
    pub(crate) fn owned_mut(&mut self, node: u64) -> Option<&mut Vec<u64>> {
        self.owned.get_mut(node as usize)
    }

    pub(crate) fn set_owned(&mut self, node: u64, children: Vec<u64>) {
        if let Some(slot) = self.owned.get_mut(node as usize) {
            *slot = children;
        }
    }

    pub(crate) fn set_shared(&mut self, node: u64, children: Vec<u64>) {
        if let Some(slot) = self.shared.get_mut(node as usize) {
            *slot = children;
        }
    }

    /// Remove `children` from the owned list of `node`, keeping order
    ///
    /// `children` must appear in the list in the same relative order; the
    /// list is walked once.
    pub fn remove_children(&mut self, node: u64, children: &[u64]) -> Result<()> {
        let list = self
            .owned
            .get_mut(node as usize)
            .ok_or_else(|| HierarchyError::invariant(format!("node {node} out of range")))?;
        let mut removed = 0;
        list.retain(|&c| {
            if children.get(removed) == Some(&c) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed != children.len() {
            return Err(HierarchyError::invariant(format!(
                "node {node}: removed {removed} children, expected {}",
                children.len()
            )));
        }
        Ok(())
    }

    pub fn num_owned_edges(&self) -> usize {
        self.owned.iter().map(Vec::len).sum()
    }

    pub fn num_shared_edges(&self) -> usize {
        self.shared.iter().map(Vec::len).sum()
    }

    #[inline]
    fn check_edge(&self, node: u64, child: u64) -> Result<()> {
        let n = self.num_nodes();
        if node >= n || child >= n {
            return Err(HierarchyError::invariant(format!(
                "edge {node} -> {child} out of range ({n} nodes)"
            )));
        }
        Ok(())
    }
}
