//! RequestContext: per-question state threaded through every stage.
//!
//! A fresh `RequestContext` is created for each incoming question, passed by
//! value from stage to stage (`fn(ctx) -> ctx`) and dropped once the response
//! has been produced. It is never shared between requests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;
use crate::grounding::GroundingResult;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// A passage produced by a source, with its score.
///
/// Treated as immutable once produced: later stages attach new scores by
/// producing copies via [`ScoredItem::with_score`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    /// Unique within one result set.
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ScoredItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Copy of this item carrying a new score.
    pub fn with_score(&self, score: f64) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }
}

/// One completed correction attempt of the grounding loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub previous_answer: String,
    pub feedback: Option<String>,
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    /// Correlation id for logs.
    pub request_id: String,
    pub created_at: DateTime<Utc>,

    pub question: String,
    pub rewritten_query: Option<String>,
    pub expanded_query: Option<String>,
    pub sub_questions: Vec<String>,
    pub selected_sources: Vec<String>,

    pub results: Vec<ScoredItem>,
    pub rerank_scores: HashMap<String, f64>,

    pub answer: Option<String>,
    pub context_used: Vec<ScoredItem>,
    pub correction_count: usize,
    pub corrections: Vec<Correction>,
    /// Last grounding evaluation, if the grounding loop ran.
    pub grounding: Option<GroundingResult>,

    /// Set by the pipeline once an upstream stage failed.
    pub halted: bool,
    /// Terminal failure recorded by exactly one stage; never cleared.
    pub error: Option<RagError>,

    pub options: HashMap<String, Value>,
    /// Whole-request deadline; per-call budgets are narrowed from it.
    #[serde(skip)]
    pub call: CallOptions,
}

impl RequestContext {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            question: question.into(),
            rewritten_query: None,
            expanded_query: None,
            sub_questions: Vec::new(),
            selected_sources: Vec::new(),
            results: Vec::new(),
            rerank_scores: HashMap::new(),
            answer: None,
            context_used: Vec::new(),
            correction_count: 0,
            corrections: Vec::new(),
            grounding: None,
            halted: false,
            error: None,
            options: HashMap::new(),
            call: CallOptions::unbounded(),
        }
    }

    pub fn with_call(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_results(mut self, results: Vec<ScoredItem>) -> Self {
        self.results = results;
        self
    }

    /// The query every embedding and retrieval call must use:
    /// expanded, else rewritten, else the original question.
    pub fn effective_query(&self) -> &str {
        self.expanded_query
            .as_deref()
            .or(self.rewritten_query.as_deref())
            .unwrap_or(&self.question)
    }

    /// Whether downstream stages must leave this context alone.
    pub fn should_skip(&self) -> bool {
        self.halted || self.error.is_some()
    }

    /// Record a terminal failure. The first recorded error wins.
    pub fn fail(mut self, error: RagError) -> Self {
        if self.error.is_none() {
            tracing::error!(
                request_id = %self.request_id,
                kind = error.kind(),
                "Request failed: {}",
                error
            );
            self.error = Some(error);
        }
        self
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}
