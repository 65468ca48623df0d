//! Collaborator traits for the backing stores and the external scorer.
//!
//! The core never talks to a concrete database; strategies hold these traits
//! behind `Arc<dyn …>`. `memory` provides in-process implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ScoredItem;
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;

/// What a vector store search is driven by.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    /// Nearest-neighbour search over an embedding.
    Vector(Vec<f32>),
    /// Keyword / full-text search.
    Text(String),
}

/// Vector index collaborator.
///
/// Implementations return at most `k` items sorted best-first.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        index_id: &str,
        query: SearchQuery,
        k: usize,
        opts: &CallOptions,
    ) -> Result<Vec<ScoredItem>, RagError>;
}

/// Rows returned by a graph query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecords {
    pub records: Vec<Map<String, Value>>,
}

/// Graph database collaborator.
///
/// `query_expr` is passed through verbatim; the core only issues the
/// expressions declared in `graph::snapshot`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn query(
        &self,
        graph_id: &str,
        query_expr: &str,
        params: &Map<String, Value>,
        opts: &CallOptions,
    ) -> Result<GraphRecords, RagError>;
}

/// External relevance scorer (cross-encoder, LLM judge, …).
///
/// Returns rescored copies of `items`; ordering of the output is not relied on.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn rerank(
        &self,
        query: &str,
        items: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<Vec<ScoredItem>, RagError>;
}
