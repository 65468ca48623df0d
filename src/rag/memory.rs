//! In-process reference stores.
//!
//! `InMemoryVectorStore` scores by cosine similarity (vector queries) or by
//! query-term coverage (text queries). `InMemoryGraphStore` answers the node
//! and edge expressions issued by `graph::snapshot`. Both are meant for tests,
//! demos and small corpora.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::context::ScoredItem;
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;
use crate::graph::snapshot::{EDGES_QUERY, NODES_QUERY};
use crate::rag::lexical;
use crate::rag::store::{GraphRecords, GraphStore, SearchQuery, VectorStore};
use crate::rag::vector_math::cosine_similarity;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    content: String,
    metadata: HashMap<String, Value>,
    embedding: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    indexes: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document in `index_id`.
    pub fn upsert(
        &self,
        index_id: &str,
        id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: HashMap<String, Value>,
    ) -> Result<(), RagError> {
        let doc = StoredDocument {
            id: id.into(),
            content: content.into(),
            metadata,
            embedding,
        };
        let mut indexes = self.indexes.write().map_err(RagError::store)?;
        let docs = indexes.entry(index_id.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        Ok(())
    }

    pub fn count(&self, index_id: &str) -> usize {
        self.indexes
            .read()
            .map(|indexes| indexes.get(index_id).map_or(0, |docs| docs.len()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        index_id: &str,
        query: SearchQuery,
        k: usize,
        _opts: &CallOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        let indexes = self.indexes.read().map_err(RagError::store)?;
        let docs = indexes
            .get(index_id)
            .ok_or_else(|| RagError::StoreFailure(format!("unknown index: {}", index_id)))?;

        let mut scored: Vec<ScoredItem> = Vec::new();
        match &query {
            SearchQuery::Vector(vector) => {
                for doc in docs {
                    let score = cosine_similarity(vector, &doc.embedding)?;
                    scored.push(to_item(doc, score));
                }
            }
            SearchQuery::Text(text) => {
                let terms = lexical::terms(text);
                for doc in docs {
                    let score = lexical::coverage(&terms, &doc.content);
                    if score > 0.0 {
                        scored.push(to_item(doc, score));
                    }
                }
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn to_item(doc: &StoredDocument, score: f64) -> ScoredItem {
    ScoredItem {
        id: doc.id.clone(),
        content: doc.content.clone(),
        score,
        metadata: doc.metadata.clone(),
    }
}

#[derive(Debug, Clone)]
struct StoredNode {
    id: String,
    name: String,
    description: String,
}

#[derive(Default)]
struct StoredGraph {
    nodes: Vec<StoredNode>,
    edges: Vec<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    graphs: RwLock<HashMap<String, StoredGraph>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &self,
        graph_id: &str,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(), RagError> {
        let mut graphs = self.graphs.write().map_err(RagError::store)?;
        graphs.entry(graph_id.to_string()).or_default().nodes.push(StoredNode {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        });
        Ok(())
    }

    pub fn add_edge(
        &self,
        graph_id: &str,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), RagError> {
        let mut graphs = self.graphs.write().map_err(RagError::store)?;
        graphs
            .entry(graph_id.to_string())
            .or_default()
            .edges
            .push((source.into(), target.into()));
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn query(
        &self,
        graph_id: &str,
        query_expr: &str,
        _params: &Map<String, Value>,
        _opts: &CallOptions,
    ) -> Result<GraphRecords, RagError> {
        let graphs = self.graphs.read().map_err(RagError::store)?;
        let Some(graph) = graphs.get(graph_id) else {
            return Ok(GraphRecords::default());
        };

        let records = if query_expr == NODES_QUERY {
            graph
                .nodes
                .iter()
                .map(|n| object(json!({ "id": n.id, "name": n.name, "description": n.description })))
                .collect()
        } else if query_expr == EDGES_QUERY {
            graph
                .edges
                .iter()
                .map(|(s, t)| object(json!({ "source": s, "target": t })))
                .collect()
        } else {
            return Err(RagError::StoreFailure(format!(
                "unsupported graph query: {}",
                query_expr
            )));
        };

        Ok(GraphRecords { records })
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
