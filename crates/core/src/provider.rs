//! Provider trait: the abstraction over model endpoints.
//!
//! The proxy talks to three kinds of endpoint through this one seam:
//! the inference backend that answers the client, the embedding provider
//! used by the embedding tier, and the small decision model used by the
//! decision tier. All of them speak the OpenAI wire format in practice.

use crate::error::ProviderError;
use crate::message::{ChatMessage, ChatRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request to a chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The backend model id (already resolved from the route)
    pub model: String,

    /// The conversation messages
    pub messages: Vec<ChatMessage>,

    /// Temperature; left to the backend default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Client parameters the proxy does not interpret, forwarded verbatim
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProviderRequest {
    /// Build a backend request from a client request, substituting the model.
    ///
    /// `temperature` and `max_tokens` stay inside `extra` so they reach the
    /// backend exactly as the client sent them.
    pub fn from_chat(request: &ChatRequest, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: request.messages.clone(),
            temperature: None,
            max_tokens: None,
            stream: request.stream,
            extra: request.extra.clone(),
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: ChatMessage,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// The backend's response body as received, relayed to the client as-is
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta carried by this chunk
    #[serde(default)]
    pub content: Option<String>,

    /// The SSE `data:` payload exactly as the backend framed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use for embeddings (e.g., "nomic-embed-text").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,

    /// Token usage.
    pub usage: Option<Usage>,
}

pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "backend", "embeddings").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Dropping the receiver cancels the underlying read.
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(StreamChunk {
            content: Some(response.message.text()),
            raw: None,
            done: true,
            usage: response.usage,
        })).await;
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            format!("Provider '{}' does not support embeddings", self.name()),
        ))
    }

    /// List available model ids for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// The model listing in OpenAI `{object, data}` form.
    ///
    /// HTTP providers override this to pass the backend's body through
    /// untouched; the default synthesizes it from [`Provider::list_models`].
    async fn models(&self) -> std::result::Result<serde_json::Value, ProviderError> {
        let data: Vec<serde_json::Value> = self
            .list_models()
            .await?
            .into_iter()
            .map(|id| serde_json::json!({ "id": id, "object": "model" }))
            .collect();
        Ok(serde_json::json!({ "object": "list", "data": data }))
    }
}
