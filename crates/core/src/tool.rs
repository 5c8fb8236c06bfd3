//! Tool trait: capabilities the proxy can invoke before forwarding.
//!
//! When a classification forces tools (`search`, `rag`), the gateway looks
//! them up here and runs each one with the user's prompt. Tool output is
//! injected as context; the proxy never parses it. The registry starts
//! empty and external collaborators register implementations.

use crate::error::ToolError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability that produces text context for a prompt.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search", "rag").
    fn name(&self) -> &str;

    /// One-line summary for logs and listings.
    fn description(&self) -> &str;

    /// Run the tool against the user's prompt, returning text context.
    async fn invoke(&self, prompt: &str) -> std::result::Result<String, ToolError>;
}

/// Tools by name. Cloning shares the tool instances.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, prompt: &str) -> std::result::Result<String, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(prompt).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
