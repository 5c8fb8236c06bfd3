//! Tier 3: a small model asked to pick the route as JSON.
//!
//! The model sees a fixed instruction plus the route list and must answer
//! with one object:
//!
//! ```json
//! {"route": "code", "needs_search": false, "needs_rag": false,
//!  "confidence": 0.8, "reasoning": "..."}
//! ```
//!
//! Anything else (prose, missing keys, an unknown route, a timeout) is a
//! tier failure and the cascade falls through to the default route.

use relayclaw_core::classification::{ClassificationResult, TOOL_RAG, TOOL_SEARCH, Tier};
use relayclaw_core::error::TierError;
use relayclaw_core::message::ChatMessage;
use relayclaw_core::provider::ProviderRequest;
use relayclaw_core::route::Route;
use relayclaw_providers::ModelEndpoint;
use serde::Deserialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

const TIER: &str = "decision";

const INSTRUCTION: &str = "You are a request router. Read the user's message and choose the \
single best route for it from the list below. Also decide whether answering needs a live web \
search (needs_search) or retrieval over earlier conversation turns (needs_rag). Reply with \
exactly one JSON object and nothing else, with the keys: route (string, one of the route \
names), needs_search (boolean), needs_rag (boolean), confidence (number between 0 and 1), \
reasoning (short string).";

#[derive(Debug, Deserialize)]
struct DecisionOutput {
    route: String,
    needs_search: bool,
    needs_rag: bool,
    confidence: f32,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Calls the decision model with temperature 0 and a capped token budget.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    endpoint: ModelEndpoint,
    timeout: Duration,
    max_tokens: u32,
}

impl DecisionEngine {
    pub fn new(endpoint: ModelEndpoint, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            endpoint,
            timeout,
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    pub async fn decide(
        &self,
        prompt: &str,
        routes: &[Route],
    ) -> Result<ClassificationResult, TierError> {
        let request = ProviderRequest {
            model: self.endpoint.model.clone(),
            messages: vec![ChatMessage::system(system_prompt(routes)), ChatMessage::user(prompt)],
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            stream: false,
            extra: serde_json::Map::new(),
        };

        let response = tokio::time::timeout(self.timeout, self.endpoint.provider.complete(request))
            .await
            .map_err(|_| TierError::Timeout {
                tier: TIER,
                after_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| TierError::Unavailable {
                tier: TIER,
                reason: e.to_string(),
            })?;

        let result = parse_decision(&response.message.text(), routes)?;
        debug!(route = ?result.route, tools = ?result.needs_tools, "Decision tier classified");
        Ok(result)
    }
}

fn system_prompt(routes: &[Route]) -> String {
    let mut prompt = String::from(INSTRUCTION);
    prompt.push_str("\n\nRoutes:\n");
    for route in routes {
        if route.description.is_empty() {
            let _ = writeln!(prompt, "- {}", route.name);
        } else {
            let _ = writeln!(prompt, "- {}: {}", route.name, route.description);
        }
    }
    prompt
}

/// Parse the model's reply into a decided result.
///
/// The first `{` through the last `}` is parsed, so code fences and
/// surrounding chatter are tolerated.
pub fn parse_decision(text: &str, routes: &[Route]) -> Result<ClassificationResult, TierError> {
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(TierError::Malformed {
                tier: TIER,
                reason: "no JSON object in reply".into(),
            });
        }
    };

    let output: DecisionOutput = serde_json::from_str(span).map_err(|e| TierError::Malformed {
        tier: TIER,
        reason: e.to_string(),
    })?;

    let route = output.route.trim();
    let Some(route) = routes.iter().find(|r| r.name == route) else {
        return Err(TierError::UnknownRoute {
            tier: TIER,
            route: output.route,
        });
    };

    let mut tools = Vec::new();
    if output.needs_search {
        tools.push(TOOL_SEARCH);
    }
    if output.needs_rag {
        tools.push(TOOL_RAG);
    }

    let confidence = if output.confidence.is_finite() {
        output.confidence
    } else {
        0.0
    };
    let mut result = ClassificationResult::decided(route.name.clone(), confidence, Tier::Decision)
        .with_tools(tools);
    if let Some(reasoning) = output.reasoning.filter(|r| !r.trim().is_empty()) {
        result = result.with_reasoning(reasoning);
    }
    Ok(result)
}
