// Graph
// Graph snapshots and community detection for graph-aware retrieval

pub mod community;
pub mod snapshot;

pub use community::{
    build_hierarchy, communities, detect, detect_hierarchical, propagate_labels, Community,
    CommunityHierarchy, DetectOptions,
};
pub use snapshot::{load_snapshot, GraphNode, GraphSnapshot, EDGES_QUERY, NODES_QUERY};
