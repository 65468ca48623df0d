//! Ready-made `Scorer` implementations.
//!
//! - `EmbeddingScorer`: cosine similarity between query and passage embeddings
//! - `LlmScorer`: asks the LLM for a 0-10 relevance rating per passage

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::context::ScoredItem;
use crate::core::deadline::{guarded, CallOptions};
use crate::core::errors::RagError;
use crate::llm::{ChatMessage, Embedder, Llm};
use crate::rag::store::Scorer;
use crate::rag::vector_math;

pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Scorer for EmbeddingScorer {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn rerank(
        &self,
        query: &str,
        items: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        if query.trim().is_empty() || items.is_empty() {
            return Ok(items.to_vec());
        }

        let query_embedding = guarded("embed", opts, self.embedder.embed(query, opts)).await?;

        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let embedding =
                guarded("embed", opts, self.embedder.embed(&item.content, opts)).await?;
            candidates.push(embedding.vector);
        }

        let mut rescored = Vec::with_capacity(items.len());
        for (idx, score) in vector_math::rank_descending_by_cosine(&query_embedding.vector, &candidates)? {
            if let Some(item) = items.get(idx) {
                rescored.push(item.with_score(score));
            }
        }
        Ok(rescored)
    }
}

const LLM_SCORER_PROMPT: &str = "Rate how relevant the passage is to the question on a scale \
from 0 (unrelated) to 10 (directly answers it). Reply with the number only.";

pub struct LlmScorer {
    llm: Arc<dyn Llm>,
}

impl LlmScorer {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    fn name(&self) -> &str {
        "llm"
    }

    async fn rerank(
        &self,
        query: &str,
        items: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        let mut rescored = Vec::with_capacity(items.len());
        for item in items {
            let messages = [
                ChatMessage::system(LLM_SCORER_PROMPT),
                ChatMessage::user(format!(
                    "Question: {}\n\nPassage:\n{}",
                    query, item.content
                )),
            ];
            let completion = guarded("llm.complete", opts, self.llm.complete(&messages, opts)).await?;
            let rating = parse_rating(&completion.content)?;
            rescored.push(item.with_score(rating / 10.0));
        }
        Ok(rescored)
    }
}

/// First number in the reply, clamped to 0..=10.
fn parse_rating(reply: &str) -> Result<f64, RagError> {
    let re = Regex::new(r"-?\d+(?:\.\d+)?").map_err(RagError::invalid_response)?;
    let number = re
        .find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| RagError::InvalidResponse(format!("no rating in reply: {:?}", reply)))?;
    Ok(number.clamp(0.0, 10.0))
}
