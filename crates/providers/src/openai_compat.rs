//! OpenAI-compatible provider implementation.
//!
//! Works with: Ollama, vLLM, llama.cpp server, LM Studio, OpenAI,
//! OpenRouter, and any endpoint exposing `/chat/completions`,
//! `/embeddings` and `/models`.
//!
//! The proxy relays backend output to its own clients, so this provider
//! keeps the raw JSON body of completions and the raw `data:` payload of
//! every SSE frame alongside the parsed fields.

use async_trait::async_trait;
use futures::StreamExt;
use relayclaw_core::error::ProviderError;
use relayclaw_core::message::ChatMessage;
use relayclaw_core::provider::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// Only the connect phase is time-limited here; streamed completions
    /// may legitimately run for minutes. Callers that need a hard bound
    /// (the routing tiers) wrap calls in their own timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}{path}", self.base_url)))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Build the JSON body for `/chat/completions`.
    ///
    /// Unknown client fields in `extra` are kept; the proxy-owned fields
    /// (model, messages, stream) always win.
    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = request.extra.clone();
        body.insert("model".into(), serde_json::json!(request.model));
        body.insert("messages".into(), serde_json::json!(request.messages));
        body.insert("stream".into(), serde_json::json!(stream));
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
        serde_json::Value::Object(body)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;
        check_status(&self.name, response).await
    }
}

/// Map non-success HTTP statuses onto [`ProviderError`].
async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if response.status().is_success() {
        return Ok(response);
    }

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    let error_body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %error_body, "Provider returned error");

    if status == 404 {
        return Err(ProviderError::ModelNotFound(error_body));
    }

    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}

#[async_trait]
impl relayclaw_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(self.post("/chat/completions").json(&body)).await?;

        let raw: serde_json::Value = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        parse_completion(raw, &request.model)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .send(
                self.post("/chat/completions")
                    .header("Accept", "text/event-stream")
                    .json(&body),
            )
            .await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Reader task: decode SSE frames until [DONE], EOF, error, or the
        // receiver is dropped (client went away).
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut finished = false;

            loop {
                let next = tokio::select! {
                    next = byte_stream.next() => next,
                    _ = tx.closed() => {
                        debug!(
                            provider = %provider_name,
                            "Stream receiver dropped, cancelling read"
                        );
                        return;
                    }
                };

                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                    None => break,
                };

                for data in decoder.push(&bytes) {
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(finished_chunk())).await;
                        return;
                    }

                    let chunk = match serde_json::from_str::<StreamResponse>(&data) {
                        Ok(parsed) => {
                            let choice = parsed.choices.first();
                            if choice.is_some_and(|c| c.finish_reason.is_some()) {
                                finished = true;
                            }
                            StreamChunk {
                                content: choice.and_then(|c| c.delta.content.clone()),
                                raw: Some(data),
                                done: false,
                                usage: parsed.usage.map(Usage::from),
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Relaying unparseable SSE chunk"
                            );
                            StreamChunk {
                                content: None,
                                raw: Some(data),
                                done: false,
                                usage: None,
                            }
                        }
                    };

                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            // EOF without [DONE]: complete only if the backend signalled a
            // finish_reason, otherwise the stream was cut short.
            if finished {
                let _ = tx.send(Ok(finished_chunk())).await;
            } else {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(
                        "backend closed the stream before completion".into(),
                    )))
                    .await;
            }
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self.send(self.post("/embeddings").json(&body)).await?;

        let mut api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        api_resp.data.sort_by_key(|d| d.index);
        let embeddings = api_resp.data.into_iter().map(|d| d.embedding).collect();

        let usage = api_resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: 0,
            total_tokens: u.total_tokens,
        });

        Ok(EmbeddingResponse {
            embeddings,
            model: api_resp.model.unwrap_or(request.model),
            usage,
        })
    }

    async fn models(&self) -> std::result::Result<serde_json::Value, ProviderError> {
        let response = self.send(self.get("/models")).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let body = self.models().await?;
        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }
}

/// Turn a raw `/chat/completions` body into a [`ProviderResponse`].
fn parse_completion(
    raw: serde_json::Value,
    requested_model: &str,
) -> std::result::Result<ProviderResponse, ProviderError> {
    let message: ChatMessage = raw
        .pointer("/choices/0/message")
        .cloned()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })
        .and_then(|m| {
            serde_json::from_value(m).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Malformed choice message: {e}"),
            })
        })?;

    let usage = raw
        .get("usage")
        .cloned()
        .and_then(|u| serde_json::from_value::<ApiUsage>(u).ok())
        .map(Usage::from);

    let model = raw["model"].as_str().unwrap_or(requested_model).to_string();

    Ok(ProviderResponse {
        message,
        usage,
        model,
        raw,
    })
}

/// Incremental SSE decoder yielding `data:` payloads.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network reads survive intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }

        payloads
    }
}

/// The terminal chunk sent after `[DONE]` or a clean finish.
fn finished_chunk() -> StreamChunk {
    StreamChunk {
        content: None,
        raw: None,
        done: true,
        usage: None,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<EmbeddingApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
