//! Per-call deadlines for collaborator calls.
//!
//! Every embedder / LLM / store call made by the core goes through
//! [`guarded`], which turns an expired deadline into [`RagError::Timeout`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::errors::RagError;

/// Options handed to every collaborator call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Absolute deadline for the call. `None` means no limit.
    pub deadline: Option<Instant>,
}

impl CallOptions {
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive options for a sub-call, keeping the earlier of the two deadlines.
    pub fn narrowed(&self, timeout: Option<Duration>) -> Self {
        let candidate = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, candidate) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self { deadline }
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

/// Run a collaborator future under the deadline carried by `opts`.
pub async fn guarded<T, F>(label: &str, opts: &CallOptions, fut: F) -> Result<T, RagError>
where
    F: Future<Output = Result<T, RagError>>,
{
    match opts.deadline {
        None => fut.await,
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(call = label, "Collaborator call timed out");
                Err(RagError::Timeout)
            }
        },
    }
}
