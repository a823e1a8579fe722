//! ResourceArc Wrappers
//!
//! A built hierarchy is immutable, so the BEAM shares it without a lock.

use rustler::ResourceArc;

use crate::hierarchy::{CommandHierarchy, TopologyType, TopologyView};

/// Wrapper for CommandHierarchy that can be stored in a ResourceArc
pub struct HierarchyResource {
    pub hierarchy: CommandHierarchy,
}

impl HierarchyResource {
    pub fn new(hierarchy: CommandHierarchy) -> Self {
        HierarchyResource { hierarchy }
    }

    /// Get a view of one topology
    #[inline]
    pub fn view(&self, topology_type: TopologyType) -> TopologyView<'_> {
        TopologyView::new(&self.hierarchy, topology_type)
    }
}

#[rustler::resource_impl]
impl rustler::Resource for HierarchyResource {}

/// Type alias for the ResourceArc
pub type HierarchyRef = ResourceArc<HierarchyResource>;
