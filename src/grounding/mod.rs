// Grounding
// Bounded generate / evaluate / correct loop for answer synthesis

mod correction;
mod llm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ScoredItem;
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;

pub use correction::GroundingLoop;
pub use llm::LlmGrounding;

/// Outcome of one grounding evaluation. Produced fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    pub grounded: bool,
    /// Share of the answer supported by the context, in `[0, 1]`.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub ungrounded_claims: Vec<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl GroundingResult {
    pub fn new(grounded: bool, score: f64) -> Self {
        Self {
            grounded,
            score: clamp_score(score),
            ungrounded_claims: Vec::new(),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_claims(mut self, claims: Vec<String>) -> Self {
        self.ungrounded_claims = claims;
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.score = clamp_score(self.score);
        self
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// States of the grounding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingState {
    Generating,
    Evaluating,
    Correcting,
    Done,
    Failed,
}

impl GroundingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingState::Generating => "generating",
            GroundingState::Evaluating => "evaluating",
            GroundingState::Correcting => "correcting",
            GroundingState::Done => "done",
            GroundingState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GroundingState::Done | GroundingState::Failed)
    }
}

/// The three model calls the grounding loop drives.
#[async_trait]
pub trait GroundingCollaborator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<String, RagError>;

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<GroundingResult, RagError>;

    async fn correct(
        &self,
        question: &str,
        answer: &str,
        grounding: &GroundingResult,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<String, RagError>;
}
