//! Chat message and request types.
//!
//! These mirror the OpenAI chat-completion schema that clients speak to the
//! proxy and that the proxy speaks to the backend. Fields the proxy does not
//! interpret (`temperature`, `tools`, `response_format`, ...) are captured in
//! `extra` and forwarded untouched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// Newer OpenAI clients send this in place of `system`
    Developer,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a chat-completion request.
///
/// `content` stays a raw JSON value so multi-part content (text + images)
/// survives the round trip to the backend unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    #[serde(default)]
    pub content: serde_json::Value,

    /// Anything else on the message (`name`, `tool_calls`, `tool_call_id`, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    fn with_text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: serde_json::Value::String(content.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_text(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_text(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, content)
    }

    /// The textual content of this message.
    ///
    /// Multi-part content is flattened by joining its `text` parts with
    /// newlines; non-text parts are ignored.
    pub fn text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }

    /// Replace the textual content of this message.
    ///
    /// Multi-part content keeps its non-text parts (images, audio). The new
    /// text goes into the first text part and the other text parts are
    /// removed, since [`ChatMessage::text`] already joined them into the
    /// text being replaced.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let mut text = Some(text.into());
        if let serde_json::Value::Array(parts) = &mut self.content {
            parts.retain_mut(|part| {
                if part.get("text").is_none() {
                    return true;
                }
                match text.take() {
                    Some(text) => {
                        part["text"] = serde_json::Value::String(text);
                        true
                    }
                    None => false,
                }
            });
        }
        if let Some(text) = text {
            self.content = serde_json::Value::String(text);
        }
    }
}

/// An inbound OpenAI-style chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model the client asked for. Replaced by the routed backend model.
    #[serde(default)]
    pub model: String,

    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    pub stream: bool,

    /// Proxy extension: the conversation this request belongs to.
    /// Consumed by the proxy and never forwarded.
    #[serde(default, skip_serializing)]
    pub conversation_id: Option<String>,

    /// Every other request parameter, forwarded verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatRequest {
    /// Index of the last user message, which is what gets classified.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.last_user_index().map(|i| self.messages[i].text())
    }

    /// Insert a context message directly before the last user message.
    pub fn insert_context(&mut self, message: ChatMessage) {
        let at = self.last_user_index().unwrap_or(self.messages.len());
        self.messages.insert(at, message);
    }
}
