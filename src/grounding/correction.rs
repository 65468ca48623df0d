use crate::context::{Correction, RequestContext};
use crate::core::deadline::{guarded, CallOptions};

use super::{GroundingCollaborator, GroundingState};

/// Runs generate → evaluate → (done | correct → evaluate) with a hard cap
/// on correction attempts.
///
/// The loop never fails because an answer stays ungrounded: once the budget
/// is spent the latest answer is accepted and its evaluation is appended to
/// `corrections`. Collaborator errors are terminal
/// and recorded on `ctx.error` (without setting `halted`).
#[derive(Debug, Clone, Copy)]
pub struct GroundingLoop {
    max_corrections: usize,
}

impl GroundingLoop {
    pub fn new(max_corrections: usize) -> Self {
        Self { max_corrections }
    }

    pub fn max_corrections(&self) -> usize {
        self.max_corrections
    }

    pub async fn answer(
        &self,
        mut ctx: RequestContext,
        collaborator: &dyn GroundingCollaborator,
        call: &CallOptions,
    ) -> RequestContext {
        if ctx.should_skip() {
            return ctx;
        }

        let question = ctx.question.clone();
        let context_used = ctx.results.clone();
        let mut state = GroundingState::Generating;
        log_transition(&ctx, state);

        let mut current = match guarded(
            "grounding.generate",
            call,
            collaborator.generate(&question, &context_used, call),
        )
        .await
        {
            Ok(answer) => answer,
            Err(err) => {
                log_transition(&ctx, GroundingState::Failed);
                return ctx.fail(err);
            }
        };

        loop {
            state = GroundingState::Evaluating;
            log_transition(&ctx, state);

            let evaluation = match guarded(
                "grounding.evaluate",
                call,
                collaborator.evaluate(&question, &current, &context_used, call),
            )
            .await
            {
                Ok(result) => result.normalized(),
                Err(err) => {
                    log_transition(&ctx, GroundingState::Failed);
                    return ctx.fail(err);
                }
            };

            if evaluation.grounded {
                state = GroundingState::Done;
                log_transition(&ctx, state);
                ctx.answer = Some(current);
                ctx.context_used = context_used;
                ctx.grounding = Some(evaluation);
                return ctx;
            }

            if ctx.correction_count >= self.max_corrections {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    corrections = ctx.correction_count,
                    score = evaluation.score,
                    "Correction budget spent; accepting ungrounded answer"
                );
                log_transition(&ctx, GroundingState::Done);
                // The final attempt is recorded but not counted as a correction.
                ctx.corrections.push(Correction {
                    previous_answer: current.clone(),
                    feedback: evaluation.feedback.clone(),
                });
                ctx.answer = Some(current);
                ctx.context_used = context_used;
                ctx.grounding = Some(evaluation);
                return ctx;
            }

            state = GroundingState::Correcting;
            log_transition(&ctx, state);

            let corrected = match guarded(
                "grounding.correct",
                call,
                collaborator.correct(&question, &current, &evaluation, &context_used, call),
            )
            .await
            {
                Ok(answer) => answer,
                Err(err) => {
                    log_transition(&ctx, GroundingState::Failed);
                    return ctx.fail(err);
                }
            };

            ctx.corrections.push(Correction {
                previous_answer: std::mem::replace(&mut current, corrected),
                feedback: evaluation.feedback,
            });
            ctx.correction_count += 1;
        }
    }
}

fn log_transition(ctx: &RequestContext, state: GroundingState) {
    tracing::debug!(
        request_id = %ctx.request_id,
        state = state.as_str(),
        corrections = ctx.correction_count,
        "Grounding loop transition"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::context::ScoredItem;
    use crate::core::errors::RagError;
    use crate::grounding::GroundingResult;

    /// Evaluations follow `verdicts`; once exhausted every answer is ungrounded.
    struct Scripted {
        verdicts: Mutex<Vec<bool>>,
        fail_generate: bool,
        fail_evaluate: bool,
        fail_correct: bool,
        generated: AtomicUsize,
        evaluated: AtomicUsize,
        corrected: AtomicUsize,
    }

    impl Scripted {
        fn new(verdicts: Vec<bool>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                fail_generate: false,
                fail_evaluate: false,
                fail_correct: false,
                generated: AtomicUsize::new(0),
                evaluated: AtomicUsize::new(0),
                corrected: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GroundingCollaborator for Scripted {
        async fn generate(
            &self,
            _question: &str,
            _context: &[ScoredItem],
            _opts: &CallOptions,
        ) -> Result<String, RagError> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            if self.fail_generate {
                return Err(RagError::LlmFailure("generate down".into()));
            }
            Ok("draft 0".into())
        }

        async fn evaluate(
            &self,
            _question: &str,
            _answer: &str,
            _context: &[ScoredItem],
            _opts: &CallOptions,
        ) -> Result<GroundingResult, RagError> {
            self.evaluated.fetch_add(1, Ordering::SeqCst);
            if self.fail_evaluate {
                return Err(RagError::InvalidResponse("not json".into()));
            }
            let mut verdicts = self.verdicts.lock().unwrap();
            let grounded = if verdicts.is_empty() {
                false
            } else {
                verdicts.remove(0)
            };
            Ok(GroundingResult::new(grounded, if grounded { 0.9 } else { 0.3 })
                .with_feedback("cite the passages"))
        }

        async fn correct(
            &self,
            _question: &str,
            _answer: &str,
            _grounding: &GroundingResult,
            _context: &[ScoredItem],
            _opts: &CallOptions,
        ) -> Result<String, RagError> {
            let n = self.corrected.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_correct {
                return Err(RagError::Timeout);
            }
            Ok(format!("draft {}", n))
        }
    }

    fn context() -> RequestContext {
        RequestContext::new("Compare Elixir and Go").with_results(vec![
            ScoredItem::new("d1", "Elixir runs on the BEAM", 0.9),
            ScoredItem::new("d2", "Go compiles to native code", 0.8),
        ])
    }

    #[tokio::test]
    async fn zero_budget_never_corrects() {
        let collab = Scripted::new(vec![false]);
        let ctx = GroundingLoop::new(0)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert_eq!(collab.corrected.load(Ordering::SeqCst), 0);
        assert_eq!(collab.evaluated.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.answer.as_deref(), Some("draft 0"));
        assert_eq!(ctx.correction_count, 0);
        assert_eq!(ctx.corrections.len(), 1);
        assert_eq!(ctx.corrections[0].previous_answer, "draft 0");
        assert_eq!(ctx.corrections[0].feedback.as_deref(), Some("cite the passages"));
        assert!(ctx.error.is_none());
    }

    #[tokio::test]
    async fn never_grounded_stops_at_budget() {
        let collab = Scripted::new(Vec::new());
        let ctx = GroundingLoop::new(3)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert_eq!(ctx.correction_count, 3);
        assert_eq!(ctx.corrections.len(), 4);
        assert_eq!(ctx.answer.as_deref(), Some("draft 3"));
        assert_eq!(ctx.corrections[0].previous_answer, "draft 0");
        assert_eq!(ctx.corrections[2].feedback.as_deref(), Some("cite the passages"));
        // The accepted answer's own evaluation closes the list.
        assert_eq!(ctx.corrections[3].previous_answer, "draft 3");
        assert_eq!(ctx.corrections[3].feedback.as_deref(), Some("cite the passages"));
        assert_eq!(ctx.grounding.as_ref().map(|g| g.grounded), Some(false));
        assert_eq!(ctx.context_used.len(), 2);
        assert!(ctx.error.is_none());
    }

    #[tokio::test]
    async fn grounded_first_time_has_no_corrections() {
        let collab = Scripted::new(vec![true]);
        let ctx = GroundingLoop::new(2)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert!(ctx.corrections.is_empty());
        assert_eq!(ctx.correction_count, 0);
        assert_eq!(ctx.answer.as_deref(), Some("draft 0"));
        assert_eq!(ctx.grounding.map(|g| g.grounded), Some(true));
    }

    #[tokio::test]
    async fn grounded_after_one_correction() {
        let collab = Scripted::new(vec![false, true]);
        let ctx = GroundingLoop::new(5)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert_eq!(ctx.correction_count, 1);
        assert_eq!(ctx.answer.as_deref(), Some("draft 1"));
    }

    #[tokio::test]
    async fn generate_failure_is_terminal_without_halting() {
        let mut collab = Scripted::new(vec![true]);
        collab.fail_generate = true;
        let ctx = GroundingLoop::new(2)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert!(matches!(ctx.error, Some(RagError::LlmFailure(_))));
        assert!(!ctx.halted);
        assert!(ctx.answer.is_none());
        assert_eq!(collab.evaluated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evaluate_failure_is_terminal() {
        let mut collab = Scripted::new(vec![true]);
        collab.fail_evaluate = true;
        let ctx = GroundingLoop::new(2)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert!(matches!(ctx.error, Some(RagError::InvalidResponse(_))));
        assert!(ctx.answer.is_none());
        assert_eq!(collab.corrected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn correct_failure_is_terminal() {
        let mut collab = Scripted::new(vec![false]);
        collab.fail_correct = true;
        let ctx = GroundingLoop::new(2)
            .answer(context(), &collab, &CallOptions::unbounded())
            .await;

        assert_eq!(ctx.error, Some(RagError::Timeout));
        assert!(!ctx.halted);
        assert!(ctx.answer.is_none());
        assert_eq!(ctx.correction_count, 0);
        assert!(ctx.corrections.is_empty());
        assert_eq!(collab.corrected.load(Ordering::SeqCst), 1);
        assert_eq!(collab.evaluated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn halted_context_is_left_alone() {
        let collab = Scripted::new(vec![true]);
        let mut input = context();
        input.halted = true;
        let ctx = GroundingLoop::new(2)
            .answer(input, &collab, &CallOptions::unbounded())
            .await;

        assert!(ctx.answer.is_none());
        assert_eq!(collab.generated.load(Ordering::SeqCst), 0);
    }
}
