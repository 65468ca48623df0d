use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ScoredItem;
use crate::core::deadline::{guarded, CallOptions};
use crate::core::errors::RagError;
use crate::llm::{ChatMessage, Llm};

use super::{GroundingCollaborator, GroundingResult};

const GENERATE_PROMPT: &str = "You answer questions using only the numbered context passages. \
Cite passage ids in square brackets. If the passages do not contain the answer, say so.";

const EVALUATE_PROMPT: &str = "You check whether an answer is supported by the context passages. \
Reply with a single JSON object and nothing else:\n\
{\"grounded\": bool, \"score\": number between 0 and 1, \
\"ungrounded_claims\": [string], \"feedback\": string}";

const CORRECT_PROMPT: &str = "You revise answers so that every claim is supported by the context \
passages. Remove or fix unsupported claims. Reply with the revised answer only.";

/// `GroundingCollaborator` backed by a chat model.
pub struct LlmGrounding {
    llm: Arc<dyn Llm>,
    timeout: Option<Duration>,
}

impl LlmGrounding {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm, timeout: None }
    }

    /// Cap every model call at `timeout` (within the caller's deadline).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn ask(
        &self,
        label: &str,
        system: &str,
        user: String,
        opts: &CallOptions,
    ) -> Result<String, RagError> {
        let call = opts.narrowed(self.timeout);
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let completion = guarded(label, &call, self.llm.complete(&messages, &call)).await?;
        let content = completion.content.trim().to_string();
        if content.is_empty() {
            return Err(RagError::InvalidResponse(format!("{}: empty reply", label)));
        }
        Ok(content)
    }
}

#[async_trait]
impl GroundingCollaborator for LlmGrounding {
    async fn generate(
        &self,
        question: &str,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<String, RagError> {
        let user = format!(
            "Context:\n{}\n\nQuestion: {}",
            format_passages(context),
            question
        );
        self.ask("grounding.generate", GENERATE_PROMPT, user, opts)
            .await
    }

    async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<GroundingResult, RagError> {
        let user = format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:\n{}",
            format_passages(context),
            question,
            answer
        );
        let reply = self
            .ask("grounding.evaluate", EVALUATE_PROMPT, user, opts)
            .await?;
        parse_evaluation(&reply)
    }

    async fn correct(
        &self,
        question: &str,
        answer: &str,
        grounding: &GroundingResult,
        context: &[ScoredItem],
        opts: &CallOptions,
    ) -> Result<String, RagError> {
        let mut user = format!(
            "Context:\n{}\n\nQuestion: {}\n\nPrevious answer:\n{}",
            format_passages(context),
            question,
            answer
        );
        if !grounding.ungrounded_claims.is_empty() {
            user.push_str("\n\nUnsupported claims:\n");
            for claim in &grounding.ungrounded_claims {
                user.push_str("- ");
                user.push_str(claim);
                user.push('\n');
            }
        }
        if let Some(feedback) = grounding.feedback.as_deref() {
            user.push_str("\n\nReviewer feedback: ");
            user.push_str(feedback);
        }
        self.ask("grounding.correct", CORRECT_PROMPT, user, opts)
            .await
    }
}

/// `[id] content` blocks, one per passage.
pub(crate) fn format_passages(items: &[ScoredItem]) -> String {
    if items.is_empty() {
        return "(no passages)".to_string();
    }
    items
        .iter()
        .map(|item| format!("[{}] {}", item.id, item.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse the evaluator's JSON reply; surrounding prose and code fences are ignored.
fn parse_evaluation(reply: &str) -> Result<GroundingResult, RagError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => {
            return Err(RagError::InvalidResponse(format!(
                "grounding evaluation is not JSON: {:?}",
                reply
            )))
        }
    };
    let result: GroundingResult =
        serde_json::from_str(json).map_err(RagError::invalid_response)?;
    Ok(result.normalized())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::Completion;

    /// Replays canned replies and records the prompts it was sent.
    struct CannedLlm {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Llm for CannedLlm {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _opts: &CallOptions,
        ) -> Result<Completion, RagError> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages.last().map(|m| m.content.clone()).unwrap_or_default());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(RagError::LlmFailure("no more replies".into()));
            }
            Ok(Completion::text(replies.remove(0)))
        }
    }

    fn passages() -> Vec<ScoredItem> {
        vec![ScoredItem::new("d1", "Go has goroutines.", 0.9)]
    }

    #[test]
    fn parses_fenced_json_and_clamps_score() {
        let reply = "Here you go:\n```json\n{\"grounded\": false, \"score\": 1.4, \
                     \"ungrounded_claims\": [\"Go is interpreted\"], \"feedback\": \"drop it\"}\n```";
        let result = parse_evaluation(reply).unwrap();
        assert!(!result.grounded);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.ungrounded_claims, vec!["Go is interpreted".to_string()]);
        assert_eq!(result.feedback.as_deref(), Some("drop it"));
    }

    #[test]
    fn non_json_evaluation_is_invalid_response() {
        assert!(matches!(
            parse_evaluation("looks fine to me"),
            Err(RagError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_evaluation("{\"score\": 0.5}"),
            Err(RagError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn correction_prompt_carries_claims_and_feedback() {
        let llm = Arc::new(CannedLlm::new(&["Go uses goroutines [d1]."]));
        let grounding = LlmGrounding::new(llm.clone());
        let evaluation = GroundingResult::new(false, 0.2)
            .with_claims(vec!["Go is interpreted".into()])
            .with_feedback("cite d1");

        let revised = grounding
            .correct("What does Go have?", "Go is interpreted.", &evaluation, &passages(), &CallOptions::unbounded())
            .await
            .unwrap();
        assert_eq!(revised, "Go uses goroutines [d1].");

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("[d1] Go has goroutines."));
        assert!(prompts[0].contains("- Go is interpreted"));
        assert!(prompts[0].contains("Reviewer feedback: cite d1"));
    }

    #[tokio::test]
    async fn empty_generation_is_invalid_response() {
        let grounding = LlmGrounding::new(Arc::new(CannedLlm::new(&["   "])));
        let result = grounding
            .generate("q", &passages(), &CallOptions::unbounded())
            .await;
        assert!(matches!(result, Err(RagError::InvalidResponse(_))));
    }
}
