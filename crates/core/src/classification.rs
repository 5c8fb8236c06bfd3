//! Classification results produced by the routing cascade.

use crate::route::RouteName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tool name forced when a request needs web search.
pub const TOOL_SEARCH: &str = "search";

/// Tool name forced when a request needs retrieval over past turns.
pub const TOOL_RAG: &str = "rag";

/// The cascade stage that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Explicit user directive (Tier 1)
    Override,
    /// Centroid similarity (Tier 2)
    Embedding,
    /// Small decision model (Tier 3)
    Decision,
    /// Configured fallback route
    Default,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Override => "override",
            Tier::Embedding => "embedding",
            Tier::Decision => "decision",
            Tier::Default => "default",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one classification tier.
///
/// `route == None` means the tier ran but was not confident enough
/// (borderline) and the router should escalate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub route: Option<RouteName>,

    /// In `[0, 1]`
    pub confidence: f32,

    pub tier: Tier,

    #[serde(default)]
    pub needs_tools: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ClassificationResult {
    /// A decided result for `route`.
    pub fn decided(route: impl Into<RouteName>, confidence: f32, tier: Tier) -> Self {
        Self {
            route: Some(route.into()),
            confidence: confidence.clamp(0.0, 1.0),
            tier,
            needs_tools: BTreeSet::new(),
            reasoning: None,
        }
    }

    /// A borderline result: the tier ran but did not pick a route.
    pub fn borderline(confidence: f32, tier: Tier) -> Self {
        Self {
            route: None,
            confidence: confidence.clamp(0.0, 1.0),
            tier,
            needs_tools: BTreeSet::new(),
            reasoning: None,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn is_decided(&self) -> bool {
        self.route.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(ClassificationResult::decided("simple", 1.7, Tier::Decision).confidence, 1.0);
        assert_eq!(ClassificationResult::borderline(-0.2, Tier::Embedding).confidence, 0.0);
    }

    #[test]
    fn borderline_is_not_decided() {
        let result = ClassificationResult::borderline(0.01, Tier::Embedding);
        assert!(!result.is_decided());
        assert_eq!(result.tier, Tier::Embedding);
    }

    #[test]
    fn tools_are_deduplicated_and_ordered() {
        let result = ClassificationResult::decided("code", 1.0, Tier::Override)
            .with_tools([TOOL_SEARCH, TOOL_RAG, TOOL_SEARCH]);
        let tools: Vec<_> = result.needs_tools.iter().map(String::as_str).collect();
        assert_eq!(tools, vec!["rag", "search"]);
    }

    #[test]
    fn tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Embedding).unwrap(), "\"embedding\"");
        assert_eq!(Tier::Default.to_string(), "default");
    }
}
