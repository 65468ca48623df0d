//! Reranking stage wrapper and result deduplication.
//!
//! `rerank` hands the current results to a `Scorer` collaborator, then
//! filters, orders and caps what comes back. A failing scorer never halts the
//! request: the original results pass through untouched.

use std::collections::HashSet;
use std::hash::Hash;

use crate::context::{RequestContext, ScoredItem};
use crate::core::deadline::{guarded, CallOptions};
use crate::rag::store::Scorer;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOptions {
    /// Items scoring below this are dropped; `<= 0` disables filtering.
    pub threshold: f64,
    /// Maximum items kept; `None` keeps as many as were passed in.
    pub limit: Option<usize>,
    /// Record `id -> score` for surviving items in `rerank_scores`.
    pub track_scores: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            limit: None,
            track_scores: true,
        }
    }
}

pub async fn rerank(
    mut ctx: RequestContext,
    scorer: &dyn Scorer,
    options: &RerankOptions,
    call: &CallOptions,
) -> RequestContext {
    ctx.rerank_scores.clear();

    if ctx.should_skip() || ctx.results.is_empty() {
        return ctx;
    }

    let query = ctx.effective_query().to_string();
    let scored = guarded(
        "scorer.rerank",
        call,
        scorer.rerank(&query, &ctx.results, call),
    )
    .await;

    let mut rescored = match scored {
        Ok(items) => items,
        Err(err) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                scorer = scorer.name(),
                "Rerank skipped, keeping original order: {}",
                err
            );
            return ctx;
        }
    };

    // Stable: equal scores keep the scorer's order.
    rescored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    if options.threshold > 0.0 {
        rescored.retain(|item| item.score >= options.threshold);
    }

    let limit = options.limit.unwrap_or(ctx.results.len());
    rescored.truncate(limit);

    if options.track_scores {
        ctx.rerank_scores = rescored
            .iter()
            .map(|item| (item.id.clone(), item.score))
            .collect();
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        before = ctx.results.len(),
        after = rescored.len(),
        "Reranked results"
    );
    ctx.results = rescored;
    ctx
}

/// Keep the first item for every key, preserving relative order.
pub fn deduplicate<K, F>(items: Vec<ScoredItem>, key: F) -> Vec<ScoredItem>
where
    K: Eq + Hash,
    F: Fn(&ScoredItem) -> K,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

pub fn deduplicate_by_id(items: Vec<ScoredItem>) -> Vec<ScoredItem> {
    deduplicate(items, |item| item.id.clone())
}
