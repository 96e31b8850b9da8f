//! OpenAI-compatible HTTP client implementing all three capabilities.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::message::Message;
use crate::provider::{ChatProvider, EmbeddingProvider, RerankProvider, TokenStream};

/// Upstream embedding APIs cap batch size at 16 inputs per call.
const EMBED_BATCH: usize = 16;
/// Default per-request deadline for chat and rerank calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn post_chat(&self, messages: &[Message], timeout: Duration) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&self.chat_body(messages, false))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::BadResponse("missing choices[0].message.content".into()))?;
        Ok(content.to_string())
    }
}

/// Extract the payload of one SSE line, if it is a `data:` frame.
fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Pull the token fragment out of one streaming chunk payload.
fn delta_content(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.post_chat(messages, DEFAULT_TIMEOUT).await
    }

    async fn chat_with_timeout(&self, messages: &[Message], timeout: Duration) -> Result<String> {
        self.post_chat(messages, timeout).await
    }

    async fn stream(&self, messages: &[Message]) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(messages, true))
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel::<Result<String>>(64);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            'outer: while let Some(next) = stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e))).await;
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Drain complete lines; a partial frame stays buffered.
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let Some(payload) = sse_data_payload(line.trim_end()) else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(fragment) = delta_content(payload) {
                        if tx.send(Ok(fragment)).await.is_err() {
                            // Receiver dropped: client went away.
                            break 'outer;
                        }
                    }
                }
            }
            debug!("chat stream closed");
        });

        Ok(rx)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_base);
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH) {
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .timeout(DEFAULT_TIMEOUT)
                .json(&json!({ "model": self.model, "input": batch }))
                .send()
                .await?
                .error_for_status()?;

            let body: Value = resp.json().await?;
            let data = body["data"]
                .as_array()
                .ok_or_else(|| LlmError::BadResponse("missing data array".into()))?;
            if data.len() != batch.len() {
                return Err(LlmError::BadResponse(format!(
                    "embedding count mismatch: sent {}, got {}",
                    batch.len(),
                    data.len()
                )));
            }
            for item in data {
                let vector: Vec<f32> = serde_json::from_value(item["embedding"].clone())?;
                embeddings.push(vector);
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl RerankProvider for OpenAiCompatClient {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<(usize, f32)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/rerank", self.api_base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(DEFAULT_TIMEOUT)
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_n": top_n,
                "return_documents": false,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        let mut scored: Vec<(usize, f32)> = body["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let index = item["index"].as_u64()? as usize;
                        let score = item["relevance_score"].as_f64()? as f32;
                        Some((index, score))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if scored.is_empty() {
            warn!("rerank response contained no results");
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_payload_strips_prefix() {
        assert_eq!(sse_data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data_payload(": keep-alive"), None);
        assert_eq!(sse_data_payload(""), None);
    }

    #[test]
    fn delta_content_reads_streaming_chunk() {
        let payload = r#"{"choices":[{"delta":{"content":"hel"}}]}"#;
        assert_eq!(delta_content(payload), Some("hel".to_string()));

        // Role-only first frame carries no content.
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(delta_content(role_only), None);

        // Empty fragments are dropped.
        let empty = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(delta_content(empty), None);
    }

    #[test]
    fn chat_body_carries_model_and_stream_flag() {
        let client = OpenAiCompatClient::new("https://api.example.com/v1/", "k", "glm-4-flash");
        let body = client.chat_body(&[Message::user("hi")], true);
        assert_eq!(body["model"], "glm-4-flash");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiCompatClient::new("https://api.example.com/v1/", "k", "m");
        assert_eq!(client.api_base, "https://api.example.com/v1");
    }
}
