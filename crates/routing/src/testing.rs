//! Scripted provider shared by the routing tests.

use async_trait::async_trait;
use relayclaw_core::error::ProviderError;
use relayclaw_core::message::ChatMessage;
use relayclaw_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Calls {
    embed: AtomicUsize,
    complete: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
}

/// Returns a fixed embedding and a fixed completion; fails when unset.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    embedding: Option<Vec<f32>>,
    reply: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Calls>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = Some(vector);
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.calls.embed.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.calls.complete.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.calls.last_request.lock().unwrap().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.complete.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_request.lock().unwrap() = Some(request.clone());
        self.pause().await;
        let reply = self
            .reply
            .clone()
            .ok_or_else(|| ProviderError::Network("connection refused".into()))?;
        Ok(ProviderResponse {
            message: ChatMessage::assistant(reply),
            usage: None,
            model: request.model,
            raw: serde_json::Value::Null,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.calls.embed.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let vector = self
            .embedding
            .clone()
            .ok_or_else(|| ProviderError::Network("connection refused".into()))?;
        Ok(EmbeddingResponse {
            embeddings: vec![vector],
            model: request.model,
            usage: None,
        })
    }
}
