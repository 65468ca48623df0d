//! Typed configuration for the retrieval core and its defaults.

use serde::{Deserialize, Serialize};

use crate::strategy::{GraphMode, StrategyKind};

/// Root configuration, usually loaded from `retrieval.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RagConfig {
    pub retrieval: RetrievalSettings,
    pub fusion: FusionSettings,
    pub rerank: RerankSettings,
    pub grounding: GroundingSettings,
    pub community: CommunitySettings,
    pub query: QuerySettings,
    pub timeouts: TimeoutSettings,
    pub rate_limits: RateLimitSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub strategy: StrategyKind,
    /// Vector index searched when no source was selected for the request.
    pub index_id: String,
    pub graph_id: String,
    pub graph_mode: GraphMode,
    pub top_k: usize,
    /// Expected embedding width; `None` skips the check.
    pub expected_dimensions: Option<usize>,
    pub generate_answer: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Hybrid,
            index_id: "default".to_string(),
            graph_id: "default".to_string(),
            graph_mode: GraphMode::Hybrid,
            top_k: 10,
            expected_dimensions: None,
            generate_answer: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// RRF smoothing constant.
    pub rrf_k: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self { rrf_k: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    /// Items scoring below this are dropped; `<= 0` disables filtering.
    pub threshold: f64,
    pub limit: Option<usize>,
    pub track_scores: bool,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.0,
            limit: None,
            track_scores: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingSettings {
    pub max_corrections: usize,
}

impl Default for GroundingSettings {
    fn default() -> Self {
        Self { max_corrections: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunitySettings {
    pub max_iterations: usize,
    pub convergence_threshold: Option<f64>,
    pub min_community_size: usize,
    pub hierarchy_levels: usize,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence_threshold: None,
            min_community_size: 1,
            hierarchy_levels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QuerySettings {
    pub rewrite: bool,
    pub expand: bool,
    pub decompose: bool,
    pub select_sources: bool,
    /// Sources offered to source selection.
    pub available_sources: Vec<String>,
}

/// Per-call timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub embed_ms: u64,
    pub search_ms: u64,
    pub graph_ms: u64,
    pub llm_ms: u64,
    pub rerank_ms: u64,
    /// Whole-request budget; every call deadline is capped by it.
    pub request_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            embed_ms: 10_000,
            search_ms: 5_000,
            graph_ms: 10_000,
            llm_ms: 60_000,
            rerank_ms: 15_000,
            request_ms: 180_000,
        }
    }
}

/// Outbound request rate per provider. `None` leaves the provider unthrottled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitSettings {
    pub llm_per_second: Option<u32>,
    pub embed_per_second: Option<u32>,
}
