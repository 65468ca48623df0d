//! RagEngine: the request pipeline assembled from config and adapters.
//!
//! Stages, in order:
//! - `QueryStage`: rewrite / expand / decompose / source selection
//! - `RetrieveStage`: runs the strategy per sub-question and source, fuses
//! - `RerankStage`: rescoring through the reranker adapter
//! - `AnswerStage`: grounded answer synthesis

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::Instant;

use crate::context::{Pipeline, RequestContext, ScoredItem, Stage};
use crate::core::config::validation::validate_config;
use crate::core::config::RagConfig;
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;
use crate::grounding::{GroundingLoop, LlmGrounding};
use crate::llm::Llm;
use crate::query::{LlmQueryTransformer, QueryOptions, QueryProcessor, QueryTransformer};
use crate::rag::fusion::fuse;
use crate::rag::rerank::{self, deduplicate_by_id, RerankOptions};
use crate::rag::store::Scorer;
use crate::strategy::{
    build_strategy, elapsed_ms, Adapters, RetrievalOptions, RetrievalResult, RetrievalStrategy,
    StrategyKind,
};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

struct QueryStage {
    transformer: Option<Arc<dyn QueryTransformer>>,
    options: QueryOptions,
}

#[async_trait]
impl Stage for QueryStage {
    fn name(&self) -> &str {
        "query"
    }

    async fn apply(&self, ctx: RequestContext) -> RequestContext {
        let Some(transformer) = self.transformer.as_ref() else {
            return ctx;
        };
        let call = ctx.call;
        QueryProcessor::process(ctx, transformer.as_ref(), &self.options, &call).await
    }
}

struct RetrieveStage {
    strategy: Arc<dyn RetrievalStrategy>,
    options: RetrievalOptions,
}

#[async_trait]
impl Stage for RetrieveStage {
    fn name(&self) -> &str {
        "retrieve"
    }

    async fn apply(&self, mut ctx: RequestContext) -> RequestContext {
        if ctx.should_skip() {
            return ctx;
        }

        let queries = if ctx.sub_questions.is_empty() {
            vec![ctx.effective_query().to_string()]
        } else {
            ctx.sub_questions.clone()
        };
        let sources = if ctx.selected_sources.is_empty() {
            vec![self.options.index_id.clone()]
        } else {
            ctx.selected_sources.clone()
        };

        let mut plans: Vec<(String, String, RetrievalOptions)> = Vec::new();
        for query in &queries {
            for source in &sources {
                let opts = RetrievalOptions {
                    index_id: source.clone(),
                    ..self.options.clone()
                }
                .with_call(ctx.call);
                plans.push((format!("{}#{}", source, plans.len()), query.clone(), opts));
            }
        }

        let outcomes = join_all(
            plans
                .iter()
                .map(|(_, query, opts)| self.strategy.retrieve_items(query, &ctx, opts)),
        )
        .await;

        let mut lists: Vec<(String, Vec<ScoredItem>)> = Vec::with_capacity(outcomes.len());
        for ((tag, _, _), outcome) in plans.into_iter().zip(outcomes) {
            match outcome {
                Ok(items) => lists.push((tag, items)),
                Err(err) => return ctx.fail(err),
            }
        }

        let merged = match lists.len() {
            1 => lists.pop().map(|(_, items)| items).unwrap_or_default(),
            _ => fuse(&lists, self.options.rrf_k),
        };
        // A single list bypasses fusion; strategies are free to repeat ids.
        let mut results = deduplicate_by_id(merged);
        results.truncate(self.options.top_k);

        tracing::debug!(
            request_id = %ctx.request_id,
            queries = queries.len(),
            sources = sources.len(),
            results = results.len(),
            "Retrieval finished"
        );
        ctx.results = results;
        ctx
    }
}

struct RerankStage {
    scorer: Option<Arc<dyn Scorer>>,
    options: Option<RerankOptions>,
    timeout: Duration,
}

#[async_trait]
impl Stage for RerankStage {
    fn name(&self) -> &str {
        "rerank"
    }

    async fn apply(&self, ctx: RequestContext) -> RequestContext {
        let (Some(scorer), Some(options)) = (self.scorer.as_ref(), self.options.as_ref()) else {
            return ctx;
        };
        let call = ctx.call.narrowed(Some(self.timeout));
        rerank::rerank(ctx, scorer.as_ref(), options, &call).await
    }
}

struct AnswerStage {
    llm: Option<Arc<dyn Llm>>,
    grounding: GroundingLoop,
    /// Fail instead of skipping when no LLM is configured.
    required: bool,
    timeout: Duration,
}

#[async_trait]
impl Stage for AnswerStage {
    fn name(&self) -> &str {
        "answer"
    }

    async fn apply(&self, ctx: RequestContext) -> RequestContext {
        if ctx.should_skip() {
            return ctx;
        }
        let Some(llm) = self.llm.as_ref() else {
            if self.required {
                return ctx.fail(RagError::AdapterUnavailable("llm".to_string()));
            }
            return ctx;
        };
        let collaborator = LlmGrounding::new(llm.clone()).with_timeout(self.timeout);
        let call = ctx.call;
        self.grounding.answer(ctx, &collaborator, &call).await
    }
}

// ---------------------------------------------------------------------------
// RagEngine
// ---------------------------------------------------------------------------

pub struct RagEngine {
    config: RagConfig,
    strategy: Arc<dyn RetrievalStrategy>,
    pipeline: Pipeline,
}

impl RagEngine {
    pub fn new(config: RagConfig, adapters: Adapters) -> Result<Self, RagError> {
        Self::with_transformer(config, adapters, None)
    }

    /// Like `new`, with an explicit query transformer. Without one, an
    /// LLM-backed transformer is used whenever query processing is enabled.
    pub fn with_transformer(
        config: RagConfig,
        adapters: Adapters,
        transformer: Option<Arc<dyn QueryTransformer>>,
    ) -> Result<Self, RagError> {
        validate_config(&config)?;
        let adapters = adapters.throttled(&config.rate_limits);
        let kind = config.retrieval.strategy;
        let strategy = build_strategy(kind, adapters.clone());
        adapters.ensure(&strategy.required_adapters())?;

        let llm_timeout = Duration::from_millis(config.timeouts.llm_ms);
        let query_options = QueryOptions::from(&config.query);
        let transformer = match transformer {
            Some(t) => Some(t),
            None if query_options.is_noop() => None,
            None => {
                let llm = adapters
                    .llm
                    .clone()
                    .ok_or_else(|| RagError::AdapterUnavailable("llm".to_string()))?;
                let t = LlmQueryTransformer::new(llm)?.with_timeout(llm_timeout);
                Some(Arc::new(t) as Arc<dyn QueryTransformer>)
            }
        };

        let mut retrieval = RetrievalOptions::from_config(&config);
        // Reranking runs once, after fusion, in its own stage.
        let rerank_options = retrieval.rerank.take();

        let answer_required = kind == StrategyKind::SelfCritiquing;
        let answer_enabled = answer_required || config.retrieval.generate_answer;

        let mut pipeline = Pipeline::new()
            .add_stage(Box::new(QueryStage {
                transformer,
                options: query_options,
            }))
            .add_stage(Box::new(RetrieveStage {
                strategy: strategy.clone(),
                options: retrieval,
            }))
            .add_stage(Box::new(RerankStage {
                scorer: adapters.reranker.clone(),
                options: rerank_options,
                timeout: Duration::from_millis(config.timeouts.rerank_ms),
            }));
        if answer_enabled {
            pipeline = pipeline.add_stage(Box::new(AnswerStage {
                llm: adapters.llm.clone(),
                grounding: GroundingLoop::new(config.grounding.max_corrections),
                required: answer_required,
                timeout: llm_timeout,
            }));
        }

        tracing::info!(
            strategy = kind.as_str(),
            stages = ?pipeline.stage_names(),
            "RAG engine ready"
        );
        Ok(Self {
            config,
            strategy,
            pipeline,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.name()
    }

    /// Answer `question` within the configured request budget.
    pub async fn ask(&self, question: &str) -> Result<RetrievalResult, RagError> {
        let call = CallOptions::with_timeout(Duration::from_millis(self.config.timeouts.request_ms));
        let ctx = RequestContext::new(question).with_call(call);
        self.ask_with(ctx).await
    }

    /// Run a caller-built context (options, deadline) through the pipeline.
    pub async fn ask_with(&self, ctx: RequestContext) -> Result<RetrievalResult, RagError> {
        let started = Instant::now();
        let ctx = self.run(ctx).await;
        if let Some(err) = ctx.error {
            return Err(err);
        }
        Ok(RetrievalResult {
            items: ctx.results,
            answer: ctx.answer,
            strategy: self.strategy.name(),
            timing_ms: elapsed_ms(started),
            critique: ctx.grounding,
        })
    }

    /// The full context after every stage ran.
    pub async fn run(&self, ctx: RequestContext) -> RequestContext {
        tracing::info!(request_id = %ctx.request_id, "Processing question");
        self.pipeline.run(ctx).await
    }
}
