// Retrieval Strategies
// One uniform contract over hybrid, self-critiquing and graph-aware retrieval

mod graph_aware;
mod hybrid;
mod self_critique;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{RequestContext, ScoredItem};
use crate::core::config::{RagConfig, RateLimitSettings, TimeoutSettings};
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;
use crate::graph::DetectOptions;
use crate::grounding::{GroundingLoop, GroundingResult, LlmGrounding};
use crate::llm::{throttle_embedder, throttle_llm, Embedder, Llm};
use crate::rag::rerank::{self, RerankOptions};
use crate::rag::store::{GraphStore, Scorer, VectorStore};

pub use graph_aware::GraphAware;
pub use hybrid::Hybrid;
pub use self_critique::SelfCritiquing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Hybrid,
    SelfCritiquing,
    GraphAware,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Hybrid => "hybrid",
            StrategyKind::SelfCritiquing => "self_critiquing",
            StrategyKind::GraphAware => "graph_aware",
        }
    }
}

/// How graph-aware retrieval reads the graph.
///
/// - `Local`: entities matching the query plus their direct neighbours
/// - `Global`: community summaries ranked against the query
/// - `Hybrid`: both, fused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphMode {
    Local,
    Global,
    Hybrid,
}

impl GraphMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphMode::Local => "local",
            GraphMode::Global => "global",
            GraphMode::Hybrid => "hybrid",
        }
    }
}

/// Collaborator kinds a strategy can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Embedder,
    VectorStore,
    GraphStore,
    Llm,
    Reranker,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Embedder => "embedder",
            Capability::VectorStore => "vector_store",
            Capability::GraphStore => "graph_store",
            Capability::Llm => "llm",
            Capability::Reranker => "reranker",
        }
    }
}

/// Injected collaborators. Each slot is optional; strategies declare which
/// ones they need through `required_adapters`.
#[derive(Clone, Default)]
pub struct Adapters {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub graph_store: Option<Arc<dyn GraphStore>>,
    pub llm: Option<Arc<dyn Llm>>,
    pub reranker: Option<Arc<dyn Scorer>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Scorer>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Wrap the model providers in rate limiters where limits are set.
    pub fn throttled(mut self, limits: &RateLimitSettings) -> Self {
        self.llm = self.llm.map(|llm| throttle_llm(llm, limits.llm_per_second));
        self.embedder = self
            .embedder
            .map(|embedder| throttle_embedder(embedder, limits.embed_per_second));
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Embedder => self.embedder.is_some(),
            Capability::VectorStore => self.vector_store.is_some(),
            Capability::GraphStore => self.graph_store.is_some(),
            Capability::Llm => self.llm.is_some(),
            Capability::Reranker => self.reranker.is_some(),
        }
    }

    /// Fail with the first missing capability (in `Capability` order).
    pub fn ensure(&self, required: &BTreeSet<Capability>) -> Result<(), RagError> {
        match required.iter().find(|c| !self.has(**c)) {
            Some(missing) => Err(RagError::AdapterUnavailable(missing.as_str().to_string())),
            None => Ok(()),
        }
    }

    pub(crate) fn embedder(&self) -> Result<&Arc<dyn Embedder>, RagError> {
        self.embedder.as_ref().ok_or_else(|| unavailable(Capability::Embedder))
    }

    pub(crate) fn vector_store(&self) -> Result<&Arc<dyn VectorStore>, RagError> {
        self.vector_store
            .as_ref()
            .ok_or_else(|| unavailable(Capability::VectorStore))
    }

    pub(crate) fn graph_store(&self) -> Result<&Arc<dyn GraphStore>, RagError> {
        self.graph_store
            .as_ref()
            .ok_or_else(|| unavailable(Capability::GraphStore))
    }

    pub(crate) fn llm(&self) -> Result<&Arc<dyn Llm>, RagError> {
        self.llm.as_ref().ok_or_else(|| unavailable(Capability::Llm))
    }
}

fn unavailable(capability: Capability) -> RagError {
    RagError::AdapterUnavailable(capability.as_str().to_string())
}

/// Per-request knobs handed to `retrieve`.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub index_id: String,
    pub graph_id: String,
    pub top_k: usize,
    pub rrf_k: usize,
    /// `None` skips reranking even when a reranker adapter is present.
    pub rerank: Option<RerankOptions>,
    pub max_corrections: usize,
    pub graph_mode: GraphMode,
    pub detect: DetectOptions,
    pub expected_dimensions: Option<usize>,
    pub generate_answer: bool,
    pub timeouts: TimeoutSettings,
    /// Whole-request deadline.
    pub call: CallOptions,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

impl RetrievalOptions {
    pub fn from_config(config: &RagConfig) -> Self {
        let rerank = config.rerank.enabled.then(|| RerankOptions {
            threshold: config.rerank.threshold,
            limit: config.rerank.limit,
            track_scores: config.rerank.track_scores,
        });
        Self {
            index_id: config.retrieval.index_id.clone(),
            graph_id: config.retrieval.graph_id.clone(),
            top_k: config.retrieval.top_k,
            rrf_k: config.fusion.rrf_k,
            rerank,
            max_corrections: config.grounding.max_corrections,
            graph_mode: config.retrieval.graph_mode,
            detect: DetectOptions::from(&config.community),
            expected_dimensions: config.retrieval.expected_dimensions,
            generate_answer: config.retrieval.generate_answer,
            timeouts: config.timeouts.clone(),
            call: CallOptions::unbounded(),
        }
    }

    pub fn with_call(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    fn budget(&self, ms: u64) -> CallOptions {
        self.call.narrowed(Some(Duration::from_millis(ms)))
    }

    pub fn embed_call(&self) -> CallOptions {
        self.budget(self.timeouts.embed_ms)
    }

    pub fn search_call(&self) -> CallOptions {
        self.budget(self.timeouts.search_ms)
    }

    pub fn graph_call(&self) -> CallOptions {
        self.budget(self.timeouts.graph_ms)
    }

    pub fn rerank_call(&self) -> CallOptions {
        self.budget(self.timeouts.rerank_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.llm_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub items: Vec<ScoredItem>,
    pub answer: Option<String>,
    pub strategy: StrategyKind,
    pub timing_ms: u64,
    /// Final grounding evaluation when an answer was synthesised.
    pub critique: Option<GroundingResult>,
}

impl RetrievalResult {
    /// No items and no answer, as returned for a halted request.
    pub fn empty(strategy: StrategyKind) -> Self {
        Self {
            items: Vec::new(),
            answer: None,
            strategy,
            timing_ms: 0,
            critique: None,
        }
    }
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> StrategyKind;

    fn required_adapters(&self) -> BTreeSet<Capability>;

    async fn retrieve(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<RetrievalResult, RagError>;

    /// Ranked items only, skipping answer synthesis.
    async fn retrieve_items(
        &self,
        query: &str,
        ctx: &RequestContext,
        opts: &RetrievalOptions,
    ) -> Result<Vec<ScoredItem>, RagError> {
        Ok(self.retrieve(query, ctx, opts).await?.items)
    }
}

pub fn build_strategy(kind: StrategyKind, adapters: Adapters) -> Arc<dyn RetrievalStrategy> {
    match kind {
        StrategyKind::Hybrid => Arc::new(Hybrid::new(adapters)),
        StrategyKind::SelfCritiquing => Arc::new(SelfCritiquing::new(adapters)),
        StrategyKind::GraphAware => Arc::new(GraphAware::new(adapters)),
    }
}

/// Rerank `items` through the wrapper when both options and a reranker exist.
pub(crate) async fn maybe_rerank(
    adapters: &Adapters,
    query: &str,
    ctx: &RequestContext,
    items: Vec<ScoredItem>,
    opts: &RetrievalOptions,
) -> Vec<ScoredItem> {
    let (Some(options), Some(scorer)) = (opts.rerank.as_ref(), adapters.reranker.as_ref()) else {
        return items;
    };
    let mut scratch = RequestContext::new(query).with_results(items);
    scratch.request_id = ctx.request_id.clone();
    rerank::rerank(scratch, scorer.as_ref(), options, &opts.rerank_call())
        .await
        .results
}

/// Run the grounding loop over `items` and return `(answer, critique)`.
pub(crate) async fn synthesize(
    llm: &Arc<dyn Llm>,
    ctx: &RequestContext,
    items: &[ScoredItem],
    opts: &RetrievalOptions,
) -> Result<(Option<String>, Option<GroundingResult>), RagError> {
    let mut scratch = ctx.clone().with_results(items.to_vec());
    scratch.correction_count = 0;
    scratch.corrections.clear();

    let grounding = LlmGrounding::new(llm.clone()).with_timeout(opts.llm_timeout());
    let done = GroundingLoop::new(opts.max_corrections)
        .answer(scratch, &grounding, &opts.call)
        .await;

    match done.error {
        Some(err) => Err(err),
        None => Ok((done.answer, done.grounding)),
    }
}

/// `Ok(false)` for a halted request, its stored error for a failed one.
///
/// Strategies check this before any collaborator call.
pub(crate) fn ensure_active(ctx: &RequestContext) -> Result<bool, RagError> {
    match (&ctx.error, ctx.halted) {
        (Some(err), _) => Err(err.clone()),
        (None, true) => Ok(false),
        (None, false) => Ok(true),
    }
}

pub(crate) fn elapsed_ms(started: tokio::time::Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}
