//! Wiretap events: one record per boundary crossing.

use crate::classification::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which boundary an event crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client → proxy
    Inbound,
    /// Proxy → client
    Outbound,
    /// Routing decisions, tool calls and other proxy-internal steps
    Internal,
}

/// A single audit-log record. Serialized as one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub ts: DateTime<Utc>,
    pub direction: Direction,
    pub role: String,
    pub conversation_id: String,
    pub model: String,
    pub content_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl WireEvent {
    pub fn new(
        direction: Direction,
        role: impl Into<String>,
        conversation_id: impl Into<String>,
        model: impl Into<String>,
        content_length: usize,
    ) -> Self {
        Self {
            ts: Utc::now(),
            direction,
            role: role.into(),
            conversation_id: conversation_id.into(),
            model: model.into(),
            content_length,
            tool: None,
            decision_tier: None,
            status: None,
        }
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.decision_tier = Some(tier);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}
