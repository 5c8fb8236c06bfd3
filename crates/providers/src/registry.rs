//! Builds the proxy's model endpoints from configuration.
//!
//! The backend is always present. The embedding and decision endpoints
//! exist only when a model is configured for them; their absence degrades
//! the matching routing tier to "skipped".

use crate::openai_compat::OpenAiCompatProvider;
use relayclaw_config::AppConfig;
use relayclaw_core::provider::Provider;
use std::sync::Arc;

/// A provider paired with the model id to request from it.
#[derive(Clone)]
pub struct ModelEndpoint {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl std::fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// All model endpoints the proxy uses.
#[derive(Clone)]
pub struct ProviderSet {
    /// Answers client requests
    pub backend: Arc<dyn Provider>,

    /// Tier 2 and background indexing
    pub embedding: Option<ModelEndpoint>,

    /// Tier 3
    pub decision: Option<ModelEndpoint>,
}

/// Build providers from configuration.
pub fn build_from_config(config: &AppConfig) -> ProviderSet {
    let backend: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
        "backend",
        &config.backend.url,
        config.backend.api_key.clone(),
    ));

    let embedding = config.embedding.model.as_ref().map(|model| {
        let url = config.embedding.url.as_deref().unwrap_or(&config.backend.url);
        let key = config
            .embedding
            .api_key
            .clone()
            .or_else(|| config.backend.api_key.clone());
        let provider: Arc<dyn Provider> =
            Arc::new(OpenAiCompatProvider::new("embedding", url, key));
        ModelEndpoint::new(provider, model.clone())
    });

    let decision = config.decision.model.as_ref().map(|model| {
        let url = config.decision.url.as_deref().unwrap_or(&config.backend.url);
        let key = config
            .decision
            .api_key
            .clone()
            .or_else(|| config.backend.api_key.clone());
        let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new("decision", url, key));
        ModelEndpoint::new(provider, model.clone())
    });

    tracing::debug!(
        backend = %config.backend.url,
        embedding = ?embedding,
        decision = ?decision,
        "Model endpoints configured"
    );

    ProviderSet {
        backend,
        embedding,
        decision,
    }
}
