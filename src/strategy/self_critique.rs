use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::{RequestContext, ScoredItem};
use crate::core::errors::RagError;

use super::hybrid::search_candidates;
use super::{
    elapsed_ms, ensure_active, maybe_rerank, synthesize, Adapters, Capability,
    RetrievalOptions, RetrievalResult, RetrievalStrategy, StrategyKind,
};

/// Hybrid retrieval followed by a grounded, self-corrected answer.
pub struct SelfCritiquing {
    adapters: Adapters,
}

impl SelfCritiquing {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    async fn ranked(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        let candidates = search_candidates(&self.adapters, query, opts).await?;
        let mut items = maybe_rerank(&self.adapters, query, ctx, candidates, opts).await;
        items.truncate(opts.top_k);
        Ok(items)
    }
}

#[async_trait]
impl RetrievalStrategy for SelfCritiquing {
    fn name(&self) -> StrategyKind {
        StrategyKind::SelfCritiquing
    }

    fn required_adapters(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Embedder, Capability::VectorStore, Capability::Llm])
    }

    async fn retrieve(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<RetrievalResult, RagError> {
        let started = Instant::now();
        if !ensure_active(ctx)? {
            return Ok(RetrievalResult::empty(StrategyKind::SelfCritiquing));
        }
        self.adapters.ensure(&self.required_adapters())?;

        let items = self.ranked(query, ctx, opts).await?;
        let (answer, critique) = synthesize(self.adapters.llm()?, ctx, &items, opts).await?;

        tracing::debug!(
            request_id = %ctx.request_id,
            strategy = "self_critiquing",
            items = items.len(),
            grounded = ?critique.as_ref().map(|c| c.grounded),
            "Retrieved"
        );
        Ok(RetrievalResult {
            items,
            answer,
            strategy: StrategyKind::SelfCritiquing,
            timing_ms: elapsed_ms(started),
            critique,
        })
    }

    async fn retrieve_items(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        if !ensure_active(ctx)? {
            return Ok(Vec::new());
        }
        self.adapters.ensure(&self.required_adapters())?;
        self.ranked(query, ctx, opts).await
    }
}
