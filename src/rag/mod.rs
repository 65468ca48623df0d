//! Retrieval plumbing: collaborator traits, rank fusion, reranking and the
//! request engine.
//!
//! - `store`: `VectorStore`, `GraphStore` and `Scorer` traits
//! - `memory`: in-memory reference adapters
//! - `fusion` / `rerank`: RRF and the reranker wrapper
//! - `engine`: `RagEngine`, the stage pipeline built from config

pub mod engine;
pub mod fusion;
pub mod lexical;
pub mod memory;
pub mod rerank;
pub mod scorers;
pub mod store;
pub mod vector_math;

pub use engine::RagEngine;
pub use fusion::{fuse, DEFAULT_RRF_K};
pub use memory::{InMemoryGraphStore, InMemoryVectorStore};
pub use rerank::{deduplicate, deduplicate_by_id, rerank, RerankOptions};
pub use scorers::{EmbeddingScorer, LlmScorer};
pub use store::{GraphRecords, GraphStore, Scorer, SearchQuery, VectorStore};
