//! Command Hierarchy Module
//!
//! Turns PM4 emulation events into several navigable trees over one shared
//! node index space:
//!
//! - **Engine / Submit**: capture structure down to indirect buffers, with
//!   packets as shared children.
//! - **AllEvent / Rgp**: draws, dispatches and syncs nested under debug
//!   labels and Vulkan call markers.
//! - **VulkanCall / VulkanEvent**: views derived from AllEvent after the pass.
//!
//! ## Architecture
//!
//! ```text
//! CommandHierarchy
//! ├── nodes: Nodes                 # type, description, aux info, metadata
//! ├── topologies: [Topology; 6]    # CSR owned + shared children per view
//! └── event_node_indices: Vec<u64> # ascending DrawDispatchDma nodes
//! ```

pub mod builder;
pub mod command;
pub mod derive;
pub mod node;
pub mod topology;
pub mod view;

// Re-export what's needed externally
pub use builder::{CommandHierarchyCreator, CreatorOptions};
pub use command::{CommandHierarchy, TopologyType};
pub use node::{AuxInfo, MarkerType, NodeType, SyncType};
pub use topology::{Topology, ROOT_NODE_INDEX};
pub use view::TopologyView;
