// Query Processing
// Optional rewrite -> expand -> decompose -> source selection chain

mod llm;
mod processor;

use async_trait::async_trait;

use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;

pub use llm::LlmQueryTransformer;
pub use processor::{QueryOptions, QueryProcessor};

/// Text transformations applied to a query before retrieval.
#[async_trait]
pub trait QueryTransformer: Send + Sync {
    /// Rephrase the query for retrieval.
    async fn rewrite(&self, query: &str, opts: &CallOptions) -> Result<String, RagError>;

    /// Add synonyms and related terms.
    async fn expand(&self, query: &str, opts: &CallOptions) -> Result<String, RagError>;

    /// Split a compound question into standalone sub-questions.
    async fn decompose(&self, query: &str, opts: &CallOptions) -> Result<Vec<String>, RagError>;

    /// Pick the sources worth searching, out of `available`.
    async fn select_sources(
        &self,
        query: &str,
        available: &[String],
        opts: &CallOptions,
    ) -> Result<Vec<String>, RagError>;
}
