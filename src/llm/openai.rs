//! Adapter for OpenAI-compatible HTTP endpoints (OpenAI, LM Studio,
//! llama.cpp server, Ollama's `/v1` API).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{Embedder, Llm};
use super::types::{ChatMessage, Completion, Embedding, FinishReason};
use crate::core::deadline::CallOptions;
use crate::core::errors::RagError;

#[derive(Clone)]
pub struct OpenAiCompatible {
    base_url: String,
    chat_model: String,
    embedding_model: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    client: Client,
}

impl OpenAiCompatible {
    pub fn new(
        base_url: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            api_key: None,
            temperature: None,
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn post(&self, path: &str, body: &Value, opts: &CallOptions) -> Result<Value, RagError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(remaining) = opts.remaining() {
            if remaining.is_zero() {
                return Err(RagError::Timeout);
            }
            request = request.timeout(remaining);
        }

        let res = request.send().await.map_err(map_transport_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::LlmFailure(format!(
                "{} returned {}: {}",
                path, status, text
            )));
        }

        res.json().await.map_err(RagError::invalid_response)
    }
}

fn map_transport_error(err: reqwest::Error) -> RagError {
    if err.is_timeout() {
        RagError::Timeout
    } else {
        RagError::llm(err)
    }
}

#[async_trait]
impl Llm for OpenAiCompatible {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, RagError> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": messages,
            "stream": false,
        });
        if let (Some(obj), Some(t)) = (body.as_object_mut(), self.temperature) {
            obj.insert("temperature".to_string(), json!(t));
        }

        let payload = self.post("/v1/chat/completions", &body, opts).await?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl Embedder for OpenAiCompatible {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn embed(&self, text: &str, opts: &CallOptions) -> Result<Embedding, RagError> {
        let body = json!({
            "model": self.embedding_model,
            "input": [text],
        });

        let payload = self.post("/v1/embeddings", &body, opts).await?;
        parse_embedding(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<Completion, RagError> {
    let choice = &payload["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| RagError::InvalidResponse("missing choices[0].message.content".into()))?
        .to_string();

    let finish_reason = choice["finish_reason"]
        .as_str()
        .map(FinishReason::from_str)
        .unwrap_or_default();

    let usage = payload["usage"]
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_u64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        finish_reason,
        usage,
    })
}

fn parse_embedding(payload: &Value) -> Result<Embedding, RagError> {
    let values = payload["data"][0]["embedding"]
        .as_array()
        .ok_or_else(|| RagError::InvalidResponse("missing data[0].embedding".into()))?;

    let vector: Vec<f32> = values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();
    if vector.len() != values.len() {
        return Err(RagError::InvalidResponse(
            "embedding contains non-numeric values".into(),
        ));
    }

    Ok(Embedding::new(vector))
}
