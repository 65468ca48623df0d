// Graph Snapshot
// Undirected in-memory view of a GraphStore graph (petgraph based)

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::deadline::{guarded, CallOptions};
use crate::core::errors::RagError;
use crate::rag::store::GraphStore;

/// Returns one record per entity with `id`, `name` and `description`.
pub const NODES_QUERY: &str =
    "MATCH (n) RETURN n.id AS id, n.name AS name, n.description AS description";

/// Returns one record per relationship with `source` and `target`.
pub const EDGES_QUERY: &str = "MATCH (a)-[]->(b) RETURN a.id AS source, b.id AS target";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = name.into();
        self.description = description.into();
        self
    }
}

/// Entities and undirected relationships of one graph.
///
/// Direction is dropped on load, self loops are ignored and parallel edges
/// collapse into one.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    graph: UnGraph<GraphNode, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl GraphSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<(String, String)>) -> Self {
        let mut snapshot = Self::new();
        for node in nodes {
            snapshot.add_node(node);
        }
        for (source, target) in edges {
            snapshot.add_edge(&source, &target);
        }
        snapshot
    }

    /// Add a node; a repeated id keeps the first node.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(index) = self.node_indices.get(&node.id) {
            return *index;
        }
        let id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_indices.insert(id, index);
        index
    }

    /// Connect two entities, creating bare nodes for unknown ids.
    pub fn add_edge(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        let a = self.add_node(GraphNode::new(source));
        let b = self.add_node(GraphNode::new(target));
        self.graph.update_edge(a, b, ());
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_indices.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_indices
            .get(id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    /// Node ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.node_indices.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Distinct neighbour ids in ascending order.
    pub fn neighbors(&self, id: &str) -> BTreeSet<&str> {
        let Some(index) = self.node_indices.get(id) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors(*index)
            .filter_map(|n| self.graph.node_weight(n))
            .map(|node| node.id.as_str())
            .collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.neighbors(id).len()
    }

    /// Every edge once, as `(source, target)` ids.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?;
                let target = self.graph.node_weight(edge.target())?;
                Some((source.id.as_str(), target.id.as_str()))
            })
            .collect()
    }
}

/// Fetch the nodes and edges of `graph_id`.
pub async fn load_snapshot(
    store: &dyn GraphStore,
    graph_id: &str,
    call: &CallOptions,
) -> Result<GraphSnapshot, RagError> {
    let params = Map::new();
    let (nodes, edges) = tokio::join!(
        guarded("graph.nodes", call, store.query(graph_id, NODES_QUERY, &params, call)),
        guarded("graph.edges", call, store.query(graph_id, EDGES_QUERY, &params, call)),
    );
    let (nodes, edges) = (nodes?, edges?);

    let mut snapshot = GraphSnapshot::new();
    for record in &nodes.records {
        let id = field(record, "id")
            .ok_or_else(|| RagError::InvalidResponse("graph node record without id".into()))?;
        let name = field(record, "name").unwrap_or_else(|| id.clone());
        let description = field(record, "description").unwrap_or_default();
        snapshot.add_node(GraphNode {
            id,
            name,
            description,
        });
    }
    for record in &edges.records {
        match (field(record, "source"), field(record, "target")) {
            (Some(source), Some(target)) => snapshot.add_edge(&source, &target),
            _ => {
                return Err(RagError::InvalidResponse(
                    "graph edge record without source/target".into(),
                ))
            }
        }
    }

    tracing::debug!(
        graph_id,
        nodes = snapshot.node_count(),
        edges = snapshot.edge_count(),
        "Loaded graph snapshot"
    );
    Ok(snapshot)
}

/// String or number field as text; null and other types count as missing.
fn field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
