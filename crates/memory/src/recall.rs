//! The `rag` tool: recalls earlier turns that resemble the prompt.
//!
//! The prompt is embedded with the same model the writer indexes with and
//! looked up in the similarity store. Hits below `min_score` are dropped.

use crate::writer::IndexTarget;
use async_trait::async_trait;
use relayclaw_core::error::ToolError;
use relayclaw_core::provider::EmbeddingRequest;
use relayclaw_core::store::SimilarityHit;
use relayclaw_core::tool::Tool;
use std::time::Duration;
use tracing::debug;

pub const RECALL_TOOL: &str = "rag";

pub struct RecallTool {
    target: IndexTarget,
    limit: usize,
    min_score: f32,
    timeout: Duration,
}

impl RecallTool {
    pub fn new(target: IndexTarget, limit: usize, min_score: f32, timeout: Duration) -> Self {
        Self {
            target,
            limit: limit.max(1),
            min_score,
            timeout,
        }
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: RECALL_TOOL.to_string(),
            reason: reason.into(),
        }
    }

    async fn embed(&self, prompt: &str) -> Result<Vec<f32>, ToolError> {
        let request = EmbeddingRequest {
            model: self.target.model.clone(),
            inputs: vec![prompt.to_string()],
        };
        let response = tokio::time::timeout(self.timeout, self.target.embedder.embed(request))
            .await
            .map_err(|_| {
                self.failed(format!("embedding timed out after {}ms", self.timeout.as_millis()))
            })?
            .map_err(|e| self.failed(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| self.failed("empty embedding response"))
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        RECALL_TOOL
    }

    fn description(&self) -> &str {
        "Earlier conversation turns similar to the prompt"
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ToolError> {
        let query = self.embed(prompt).await?;
        let hits: Vec<SimilarityHit> = self
            .target
            .store
            .search(&query, self.limit)
            .await
            .map_err(|e| self.failed(e.to_string()))?
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        debug!(hits = hits.len(), store = self.target.store.name(), "Recall search done");
        if hits.is_empty() {
            return Ok("No related earlier turns.".to_string());
        }

        Ok(hits
            .iter()
            .map(|hit| format!("- ({:.2}) {}", hit.score, hit.source_text))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
