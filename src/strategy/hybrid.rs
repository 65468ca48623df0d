use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::{RequestContext, ScoredItem};
use crate::core::deadline::guarded;
use crate::core::errors::RagError;
use crate::rag::fusion::fuse;
use crate::rag::store::SearchQuery;

use super::{
    elapsed_ms, ensure_active, maybe_rerank, Adapters, Capability, RetrievalOptions,
    RetrievalResult, RetrievalStrategy, StrategyKind,
};

/// Vector search plus keyword search, fused with RRF.
pub struct Hybrid {
    adapters: Adapters,
}

impl Hybrid {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl RetrievalStrategy for Hybrid {
    fn name(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn required_adapters(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Embedder, Capability::VectorStore])
    }

    async fn retrieve(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<RetrievalResult, RagError> {
        let started = Instant::now();
        if !ensure_active(ctx)? {
            return Ok(RetrievalResult::empty(StrategyKind::Hybrid));
        }
        self.adapters.ensure(&self.required_adapters())?;

        let candidates = search_candidates(&self.adapters, query, opts).await?;
        let mut items = maybe_rerank(&self.adapters, query, ctx, candidates, opts).await;
        items.truncate(opts.top_k);

        tracing::debug!(
            request_id = %ctx.request_id,
            strategy = "hybrid",
            items = items.len(),
            "Retrieved"
        );
        Ok(RetrievalResult {
            items,
            answer: None,
            strategy: StrategyKind::Hybrid,
            timing_ms: elapsed_ms(started),
            critique: None,
        })
    }
}

/// Embed `query`, run vector and keyword search concurrently and fuse them.
pub(crate) async fn search_candidates(
    adapters: &Adapters,
    query: &str,
    opts: &RetrievalOptions,
) -> Result<Vec<ScoredItem>, RagError> {
    let embedder = adapters.embedder()?;
    let store = adapters.vector_store()?;

    let embed_call = opts.embed_call();
    let embedding = guarded("embed", &embed_call, embedder.embed(query, &embed_call)).await?;
    if embedding.vector.len() != embedding.dimensions {
        return Err(RagError::DimensionMismatch {
            expected: embedding.dimensions,
            actual: embedding.vector.len(),
        });
    }
    if let Some(expected) = opts.expected_dimensions {
        if expected != embedding.vector.len() {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: embedding.vector.len(),
            });
        }
    }

    let search_call = opts.search_call();
    let (vector, keyword) = tokio::join!(
        guarded(
            "vector.search",
            &search_call,
            store.search(
                &opts.index_id,
                SearchQuery::Vector(embedding.vector),
                opts.top_k,
                &search_call,
            ),
        ),
        guarded(
            "keyword.search",
            &search_call,
            store.search(
                &opts.index_id,
                SearchQuery::Text(query.to_string()),
                opts.top_k,
                &search_call,
            ),
        ),
    );

    Ok(fuse(&[("vector", vector?), ("keyword", keyword?)], opts.rrf_k))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::rag::rerank::RerankOptions;
    use crate::rag::store::Scorer;
    use crate::strategy::testing::{corpus, VowelEmbedder};
    use crate::core::deadline::CallOptions;

    fn options() -> RetrievalOptions {
        RetrievalOptions {
            index_id: "docs".into(),
            top_k: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn issues_both_searches_and_fuses() {
        let store = Arc::new(corpus());
        let strategy = Hybrid::new(
            Adapters::new()
                .with_embedder(Arc::new(VowelEmbedder::default()))
                .with_vector_store(store.clone()),
        );

        let result = strategy
            .retrieve("Elixir Go", &RequestContext::new("Elixir Go"), &options())
            .await
            .unwrap();

        assert_eq!(result.strategy, StrategyKind::Hybrid);
        assert_eq!(result.items.len(), 3);
        assert!(result.answer.is_none());
        // d3 matches both keywords; it must be near the top.
        assert!(result.items.iter().take(2).any(|i| i.id == "d3"));
        let mut searches = store.searches.lock().unwrap().clone();
        searches.sort();
        assert_eq!(searches, vec!["docs:text", "docs:vector"]);
    }

    #[tokio::test]
    async fn missing_adapter_fails_before_any_call() {
        let embedder = Arc::new(VowelEmbedder::default());
        let strategy = Hybrid::new(Adapters::new().with_embedder(embedder.clone()));

        let err = strategy
            .retrieve("q", &RequestContext::new("q"), &options())
            .await
            .unwrap_err();
        assert_eq!(err, RagError::AdapterUnavailable("vector_store".into()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn halted_request_is_not_searched() {
        let embedder = Arc::new(VowelEmbedder::default());
        let store = Arc::new(corpus());
        let strategy = Hybrid::new(
            Adapters::new()
                .with_embedder(embedder.clone())
                .with_vector_store(store.clone()),
        );
        let mut ctx = RequestContext::new("Elixir");
        ctx.halted = true;

        let result = strategy.retrieve("Elixir", &ctx, &options()).await.unwrap();
        assert!(result.items.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(store.searches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_reported() {
        let store = Arc::new(corpus());
        let strategy = Hybrid::new(
            Adapters::new()
                .with_embedder(Arc::new(VowelEmbedder::default()))
                .with_vector_store(store.clone()),
        );
        let opts = RetrievalOptions {
            expected_dimensions: Some(768),
            ..options()
        };

        let err = strategy
            .retrieve("q", &RequestContext::new("q"), &opts)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RagError::DimensionMismatch {
                expected: 768,
                actual: 2
            }
        );
        assert!(store.searches.lock().unwrap().is_empty());

        let lying = Hybrid::new(
            Adapters::new()
                .with_embedder(Arc::new(VowelEmbedder {
                    report_dimensions: Some(3),
                    ..Default::default()
                }))
                .with_vector_store(Arc::new(corpus())),
        );
        assert!(matches!(
            lying.retrieve("q", &RequestContext::new("q"), &options()).await,
            Err(RagError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    /// Puts d4 first regardless of the query.
    struct PreferD4;

    #[async_trait]
    impl Scorer for PreferD4 {
        fn name(&self) -> &str {
            "prefer-d4"
        }

        async fn rerank(
            &self,
            _query: &str,
            items: &[ScoredItem],
            _opts: &CallOptions,
        ) -> Result<Vec<ScoredItem>, RagError> {
            Ok(items
                .iter()
                .map(|i| i.with_score(if i.id == "d4" { 1.0 } else { 0.5 }))
                .collect())
        }
    }

    #[tokio::test]
    async fn reranker_applies_when_enabled() {
        let strategy = Hybrid::new(
            Adapters::new()
                .with_embedder(Arc::new(VowelEmbedder::default()))
                .with_vector_store(Arc::new(corpus()))
                .with_reranker(Arc::new(PreferD4)),
        );
        let opts = RetrievalOptions {
            top_k: 4,
            rerank: Some(RerankOptions::default()),
            ..options()
        };
        let result = strategy
            .retrieve("Elixir", &RequestContext::new("Elixir"), &opts)
            .await
            .unwrap();
        assert_eq!(result.items[0].id, "d4");

        let untouched = strategy
            .retrieve(
                "Elixir",
                &RequestContext::new("Elixir"),
                &RetrievalOptions {
                    rerank: None,
                    ..opts
                },
            )
            .await
            .unwrap();
        assert_ne!(untouched.items[0].id, "d4");
    }
}
