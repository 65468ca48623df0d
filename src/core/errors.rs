use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by every stage and collaborator.
///
/// Collaborators return these directly; stages either propagate them
/// (`RequestContext::error`) or, for reranking, degrade to pass-through.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RagError {
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("collaborator call timed out")]
    Timeout,
    #[error("llm failure: {0}")]
    LlmFailure(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("store failure: {0}")]
    StoreFailure(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RagError {
    pub fn llm<E: std::fmt::Display>(err: E) -> Self {
        RagError::LlmFailure(err.to_string())
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        RagError::StoreFailure(err.to_string())
    }

    pub fn invalid_response<E: std::fmt::Display>(err: E) -> Self {
        RagError::InvalidResponse(err.to_string())
    }

    /// Short machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::AdapterUnavailable(_) => "adapter_unavailable",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::Timeout => "timeout",
            RagError::LlmFailure(_) => "llm_failure",
            RagError::InvalidResponse(_) => "invalid_response",
            RagError::NotConfigured(_) => "not_configured",
            RagError::StoreFailure(_) => "store_failure",
            RagError::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        let err = RagError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 768, got 384");
        assert_eq!(
            RagError::AdapterUnavailable("llm".into()).to_string(),
            "adapter unavailable: llm"
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let value = serde_json::to_value(RagError::Timeout).unwrap();
        assert_eq!(value["kind"], "timeout");
        assert_eq!(RagError::llm("boom"), RagError::LlmFailure("boom".into()));
        assert_eq!(RagError::store("down").kind(), "store_failure");
    }
}
