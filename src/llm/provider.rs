use async_trait::async_trait;

use super::types::{ChatMessage, Completion, Embedding};
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;

/// Chat-completion collaborator.
#[async_trait]
pub trait Llm: Send + Sync {
    /// provider name (e.g. "openai", "lmstudio"), used in logs
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, RagError>;
}

/// Text-embedding collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str, opts: &CallOptions) -> Result<Embedding, RagError>;
}
