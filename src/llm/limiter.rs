//! Provider-level request throttling.
//!
//! Wrappers hold their own `governor` limiter, created when the provider is
//! wired up and dropped with it. Waiting for a permit counts against the
//! call's deadline.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use super::provider::{Embedder, Llm};
use super::types::{ChatMessage, Completion, Embedding};
use crate::core::deadline::{guarded, CallOptions};
use crate::core::errors::RagError;

fn limiter(per_second: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(per_second))
}

async fn acquire(limiter: &DefaultDirectRateLimiter, label: &str, opts: &CallOptions) -> Result<(), RagError> {
    guarded(label, opts, async {
        limiter.until_ready().await;
        Ok(())
    })
    .await
}

pub struct RateLimitedLlm {
    inner: Arc<dyn Llm>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedLlm {
    pub fn new(inner: Arc<dyn Llm>, per_second: NonZeroU32) -> Self {
        Self {
            inner,
            limiter: limiter(per_second),
        }
    }
}

#[async_trait]
impl Llm for RateLimitedLlm {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, RagError> {
        acquire(&self.limiter, "llm.rate_limit", opts).await?;
        self.inner.complete(messages, opts).await
    }
}

pub struct RateLimitedEmbedder {
    inner: Arc<dyn Embedder>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, per_second: NonZeroU32) -> Self {
        Self {
            inner,
            limiter: limiter(per_second),
        }
    }
}

#[async_trait]
impl Embedder for RateLimitedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str, opts: &CallOptions) -> Result<Embedding, RagError> {
        acquire(&self.limiter, "embed.rate_limit", opts).await?;
        self.inner.embed(text, opts).await
    }
}

/// Wrap `llm` in a limiter when a rate is configured.
pub fn throttle_llm(llm: Arc<dyn Llm>, per_second: Option<u32>) -> Arc<dyn Llm> {
    match per_second.and_then(NonZeroU32::new) {
        Some(rate) => Arc::new(RateLimitedLlm::new(llm, rate)),
        None => llm,
    }
}

/// Wrap `embedder` in a limiter when a rate is configured.
pub fn throttle_embedder(embedder: Arc<dyn Embedder>, per_second: Option<u32>) -> Arc<dyn Embedder> {
    match per_second.and_then(NonZeroU32::new) {
        Some(rate) => Arc::new(RateLimitedEmbedder::new(embedder, rate)),
        None => embedder,
    }
}
