//! Stage trait and the sequential Pipeline runner.
//!
//! Stages are composable units that each transform a `RequestContext`
//! (query processing, retrieval, reranking, answering, …). `Pipeline`
//! chains them and applies them in order to a single owned context.

use async_trait::async_trait;

use super::request_context::RequestContext;

// ---------------------------------------------------------------------------
// Stage Trait
// ---------------------------------------------------------------------------

/// A single step of request processing.
///
/// A stage receives the context by value and hands back the replacement.
/// Failures are recorded on the context (`RequestContext::fail`), never
/// returned, so the pipeline can decide what runs next.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name for logging / diagnostics.
    fn name(&self) -> &str;

    async fn apply(&self, ctx: RequestContext) -> RequestContext;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Chains multiple `Stage`s and applies them sequentially.
///
/// After a stage leaves `error` set, the context is marked `halted` and every
/// later stage is skipped.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Add a stage to the end of the pipeline.
    pub fn add_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub async fn run(&self, mut ctx: RequestContext) -> RequestContext {
        for stage in &self.stages {
            if ctx.halted {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    "Stage '{}' skipped: request halted",
                    stage.name()
                );
                continue;
            }

            ctx = stage.apply(ctx).await;

            if ctx.error.is_some() {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    "Stage '{}' failed; halting remaining stages",
                    stage.name()
                );
                ctx.halted = true;
            } else {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    "Stage '{}' completed",
                    stage.name()
                );
            }
        }

        ctx
    }

    /// Number of stages in the pipeline.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::context::ScoredItem;
    use crate::core::errors::RagError;

    /// A test stage that appends one result.
    struct AppendStage {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for AppendStage {
        fn name(&self) -> &str {
            "append"
        }

        async fn apply(&self, mut ctx: RequestContext) -> RequestContext {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = format!("d{}", ctx.results.len() + 1);
            ctx.results.push(ScoredItem::new(id, "text", 1.0));
            ctx
        }
    }

    /// A test stage that always fails.
    struct FailStage;

    #[async_trait]
    impl Stage for FailStage {
        fn name(&self) -> &str {
            "fail"
        }

        async fn apply(&self, ctx: RequestContext) -> RequestContext {
            ctx.fail(RagError::LlmFailure("critical failure".into()))
        }
    }

    #[tokio::test]
    async fn runs_stages_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new()
            .add_stage(Box::new(AppendStage { calls: calls.clone() }))
            .add_stage(Box::new(AppendStage { calls: calls.clone() }));

        let ctx = pipeline.run(RequestContext::new("q")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let ids: Vec<_> = ctx.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert!(!ctx.halted);
    }

    #[tokio::test]
    async fn failure_halts_later_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new()
            .add_stage(Box::new(FailStage))
            .add_stage(Box::new(AppendStage { calls: calls.clone() }));

        assert_eq!(pipeline.stage_names(), vec!["fail", "append"]);

        let ctx = pipeline.run(RequestContext::new("q")).await;
        assert!(ctx.halted);
        assert_eq!(ctx.error, Some(RagError::LlmFailure("critical failure".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(ctx.results.is_empty());
    }
}
