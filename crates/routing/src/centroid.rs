//! Centroid store for the embedding tier.
//!
//! A centroid file is JSON produced offline by embedding labelled example
//! prompts with the same model the proxy uses at runtime:
//!
//! ```json
//! {
//!   "model": "nomic-embed-text",
//!   "dimension": 768,
//!   "centroids": { "simple": [0.01, ...], "complex": [0.02, ...] }
//! }
//! ```
//!
//! Category names must be route names. Loaded once at startup, read-only after.

use relayclaw_core::classification::{ClassificationResult, Tier};
use relayclaw_core::error::TierError;
use relayclaw_core::route::RouteName;
use relayclaw_memory::cosine_similarity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CentroidError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid centroid set: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct CentroidFile {
    model: String,
    dimension: usize,
    centroids: BTreeMap<String, Vec<f32>>,
}

/// Per-route mean embeddings.
#[derive(Debug, Clone)]
pub struct CentroidSet {
    model: String,
    dimension: usize,
    centroids: Vec<(RouteName, Vec<f32>)>,
}

impl CentroidSet {
    pub fn new(
        model: impl Into<String>,
        dimension: usize,
        centroids: impl IntoIterator<Item = (RouteName, Vec<f32>)>,
    ) -> Result<Self, CentroidError> {
        let set = Self {
            model: model.into(),
            dimension,
            centroids: centroids.into_iter().collect(),
        };
        set.validate()?;
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, CentroidError> {
        let content = std::fs::read_to_string(path).map_err(|e| CentroidError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            CentroidError::Parse { reason, .. } => CentroidError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn parse(json: &str) -> Result<Self, CentroidError> {
        let file: CentroidFile = serde_json::from_str(json).map_err(|e| CentroidError::Parse {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        Self::new(file.model, file.dimension, file.centroids)
    }

    fn validate(&self) -> Result<(), CentroidError> {
        if self.model.trim().is_empty() {
            return Err(CentroidError::Invalid("model must not be empty".into()));
        }
        if self.dimension == 0 {
            return Err(CentroidError::Invalid("dimension must be > 0".into()));
        }
        if self.centroids.len() < 2 {
            return Err(CentroidError::Invalid(format!(
                "need at least 2 categories, found {}",
                self.centroids.len()
            )));
        }
        for (name, vector) in &self.centroids {
            if vector.len() != self.dimension {
                return Err(CentroidError::Invalid(format!(
                    "centroid '{name}' has {} values, expected {}",
                    vector.len(),
                    self.dimension
                )));
            }
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.centroids.iter().map(|(name, _)| name.as_str())
    }

    /// Pick the nearest category for `vector`.
    ///
    /// Confidence is the similarity margin between the best and second-best
    /// category. Below `threshold` the result is borderline (`route == None`).
    pub fn classify(
        &self,
        vector: &[f32],
        threshold: f32,
    ) -> Result<ClassificationResult, TierError> {
        if vector.len() != self.dimension {
            return Err(TierError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(&str, f32)> = self
            .centroids
            .iter()
            .map(|(name, centroid)| (name.as_str(), cosine_similarity(vector, centroid)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best, best_score) = scored[0];
        let second_score = scored[1].1;
        let margin = (best_score - second_score).abs();
        let reasoning = format!("{best} {best_score:.3}, runner-up {second_score:.3}");

        if margin >= threshold {
            Ok(ClassificationResult::decided(best, margin, Tier::Embedding)
                .with_reasoning(reasoning))
        } else {
            Ok(ClassificationResult::borderline(margin, Tier::Embedding).with_reasoning(reasoning))
        }
    }
}
