//! Retrieval-augmented generation orchestration.
//!
//! A question flows through query processing, a retrieval strategy, optional
//! reranking and grounded answer synthesis. Every external system (vector
//! store, graph store, embedder, LLM, reranker) sits behind a trait.

pub mod context;
pub mod core;
pub mod graph;
pub mod grounding;
pub mod llm;
pub mod query;
pub mod rag;
pub mod strategy;

pub use crate::context::{Pipeline, RequestContext, ScoredItem, Stage};
pub use crate::core::config::RagConfig;
pub use crate::core::errors::RagError;
pub use crate::core::CallOptions;
pub use crate::rag::RagEngine;
pub use crate::strategy::{
    build_strategy, Adapters, GraphMode, RetrievalOptions, RetrievalResult, RetrievalStrategy,
    StrategyKind,
};
