use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::core::deadline::{guarded, CallOptions};
use crate::core::errors::RagError;
use crate::llm::{ChatMessage, Llm};

use super::QueryTransformer;

const REWRITE_PROMPT: &str = "Rewrite the user's question as a clear, self-contained search query. \
Reply with the query only.";

const EXPAND_PROMPT: &str = "Expand the search query with synonyms and closely related terms. \
Reply with the expanded query on one line.";

const DECOMPOSE_PROMPT: &str = "Split the question into the smallest set of standalone \
sub-questions needed to answer it. Reply with one sub-question per line.";

const SELECT_PROMPT: &str = "Choose which of the listed sources are worth searching for the \
question. Reply with the chosen source names separated by commas.";

/// `QueryTransformer` backed by a chat model.
pub struct LlmQueryTransformer {
    llm: Arc<dyn Llm>,
    list_marker: Regex,
    timeout: Option<Duration>,
}

impl LlmQueryTransformer {
    pub fn new(llm: Arc<dyn Llm>) -> Result<Self, RagError> {
        let list_marker =
            Regex::new(r"^\s*(?:[-*•]|\d+[.)]|\(\d+\))\s*").map_err(RagError::invalid_response)?;
        Ok(Self {
            llm,
            list_marker,
            timeout: None,
        })
    }

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
        Ok(completion.content.trim().to_string())
    }

    fn parse_lines(&self, reply: &str) -> Vec<String> {
        reply
            .lines()
            .map(|line| self.list_marker.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

#[async_trait]
impl QueryTransformer for LlmQueryTransformer {
    async fn rewrite(&self, query: &str, opts: &CallOptions) -> Result<String, RagError> {
        self.ask("query.rewrite", REWRITE_PROMPT, query.to_string(), opts)
            .await
    }

    async fn expand(&self, query: &str, opts: &CallOptions) -> Result<String, RagError> {
        self.ask("query.expand", EXPAND_PROMPT, query.to_string(), opts)
            .await
    }

    async fn decompose(&self, query: &str, opts: &CallOptions) -> Result<Vec<String>, RagError> {
        let reply = self
            .ask("query.decompose", DECOMPOSE_PROMPT, query.to_string(), opts)
            .await?;
        Ok(self.parse_lines(&reply))
    }

    async fn select_sources(
        &self,
        query: &str,
        available: &[String],
        opts: &CallOptions,
    ) -> Result<Vec<String>, RagError> {
        let user = format!("Sources: {}\n\nQuestion: {}", available.join(", "), query);
        let reply = self.ask("query.select_sources", SELECT_PROMPT, user, opts).await?;

        let mut selected = Vec::new();
        for name in reply.split([',', '\n']) {
            let name = self.list_marker.replace(name, "");
            let name = name.trim();
            if let Some(source) = available.iter().find(|s| s.eq_ignore_ascii_case(name)) {
                if !selected.contains(source) {
                    selected.push(source.clone());
                }
            }
        }
        Ok(selected)
    }
}
