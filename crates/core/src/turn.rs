//! Persisted conversation records.
//!
//! A [`ConversationTurn`] is one message of one exchange, created when a
//! request arrives (user turn) and when a response completes (assistant
//! turn). Turns are append-only: content is fixed at construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(format!("unknown turn role '{other}'")),
        }
    }
}

/// One logical message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub turn_id: String,
    pub role: TurnRole,
    /// Route name for user turns, backend model id for assistant turns
    pub model_used: String,
    pub content: String,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// A user turn, recorded when the request is received.
    pub fn user(
        conversation_id: impl Into<String>,
        model_used: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            conversation_id: conversation_id.into(),
            turn_id: Uuid::new_v4().to_string(),
            role: TurnRole::User,
            model_used: model_used.into(),
            token_count: estimate_tokens(&content),
            content,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn, recorded once the full response has been relayed.
    ///
    /// `reported_tokens` is the backend's completion token count when known.
    pub fn assistant(
        conversation_id: impl Into<String>,
        model_used: impl Into<String>,
        content: impl Into<String>,
        reported_tokens: Option<u32>,
    ) -> Self {
        let content = content.into();
        Self {
            conversation_id: conversation_id.into(),
            turn_id: Uuid::new_v4().to_string(),
            role: TurnRole::Assistant,
            model_used: model_used.into(),
            token_count: reported_tokens.unwrap_or_else(|| estimate_tokens(&content)),
            content,
            created_at: Utc::now(),
        }
    }
}

/// A turn's embedding in the similarity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// The [`ConversationTurn::turn_id`] this vector belongs to
    pub turn_id: String,
    pub vector: Vec<f32>,
    pub source_text: String,
}

/// Rough token estimate: 4 chars ≈ 1 token, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    text.chars().count().div_ceil(4) as u32
}
