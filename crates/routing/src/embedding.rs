//! Tier 2: nearest-centroid classification over prompt embeddings.

use crate::centroid::CentroidSet;
use relayclaw_core::classification::ClassificationResult;
use relayclaw_core::error::TierError;
use relayclaw_core::provider::EmbeddingRequest;
use relayclaw_providers::ModelEndpoint;
use std::time::Duration;
use tracing::debug;

const TIER: &str = "embedding";

/// Embeds the prompt once and compares it against the centroid set.
#[derive(Debug, Clone)]
pub struct EmbeddingClassifier {
    endpoint: ModelEndpoint,
    centroids: CentroidSet,
    threshold: f32,
    timeout: Duration,
}

impl EmbeddingClassifier {
    pub fn new(
        endpoint: ModelEndpoint,
        centroids: CentroidSet,
        threshold: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            centroids,
            threshold,
            timeout,
        }
    }

    pub fn centroids(&self) -> &CentroidSet {
        &self.centroids
    }

    /// Classify `prompt`. A borderline margin yields `route == None`.
    pub async fn classify(&self, prompt: &str) -> Result<ClassificationResult, TierError> {
        let request = EmbeddingRequest {
            model: self.endpoint.model.clone(),
            inputs: vec![prompt.to_string()],
        };

        let response = tokio::time::timeout(self.timeout, self.endpoint.provider.embed(request))
            .await
            .map_err(|_| TierError::Timeout {
                tier: TIER,
                after_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| TierError::Unavailable {
                tier: TIER,
                reason: e.to_string(),
            })?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| TierError::Malformed {
                tier: TIER,
                reason: "provider returned no embeddings".into(),
            })?;

        let result = self.centroids.classify(&vector, self.threshold)?;
        debug!(
            route = ?result.route,
            margin = result.confidence,
            threshold = self.threshold,
            "Embedding tier classified"
        );
        Ok(result)
    }
}
