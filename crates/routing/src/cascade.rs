//! The routing cascade.
//!
//! Each request runs once through an ordered list of [`Stage`]s:
//!
//! ```text
//! override ──► embedding ──► decision ──► default
//!   (free)     (1 embed)    (1 completion)  (always decides)
//! ```
//!
//! A stage either decides (returns a result with a route), passes a
//! borderline result along, or is skipped (`None`). The first deciding
//! stage ends the cascade. The default stage always decides, so every
//! request leaves with a route that resolves in the current table.

use crate::centroid::CentroidSet;
use crate::decision::DecisionEngine;
use crate::embedding::EmbeddingClassifier;
use crate::overrides::{Directive, ParsedOverride};
use crate::table::{RouteTable, SharedRouteTable};
use async_trait::async_trait;
use relayclaw_config::{AppConfig, ConfigError};
use relayclaw_core::classification::{ClassificationResult, Tier};
use relayclaw_core::route::Route;
use relayclaw_providers::ProviderSet;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the stages see for one request.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    /// The prompt with any directive removed
    pub prompt: String,
    pub directive: Option<Directive>,
}

/// One step of the cascade.
#[async_trait]
pub trait Stage: Send + Sync {
    fn tier(&self) -> Tier;

    /// Check this stage against a route table before it is used.
    fn check(&self, _table: &RouteTable) -> Result<(), ConfigError> {
        Ok(())
    }

    /// `None` means skipped. A result with `route == None` is borderline.
    async fn attempt(
        &self,
        request: &RoutingRequest,
        table: &RouteTable,
    ) -> Option<ClassificationResult>;
}

/// Tier 1: the parsed directive, when it names a route.
pub struct OverrideStage;

#[async_trait]
impl Stage for OverrideStage {
    fn tier(&self) -> Tier {
        Tier::Override
    }

    async fn attempt(
        &self,
        request: &RoutingRequest,
        _table: &RouteTable,
    ) -> Option<ClassificationResult> {
        request.directive.as_ref().and_then(Directive::classification)
    }
}

/// Tier 2.
pub struct EmbeddingStage {
    classifier: EmbeddingClassifier,
}

impl EmbeddingStage {
    pub fn new(classifier: EmbeddingClassifier) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage for EmbeddingStage {
    fn tier(&self) -> Tier {
        Tier::Embedding
    }

    fn check(&self, table: &RouteTable) -> Result<(), ConfigError> {
        for category in self.classifier.centroids().categories() {
            if !table.contains(category) {
                return Err(ConfigError::ValidationError(format!(
                    "centroid category '{category}' is not a route"
                )));
            }
        }
        Ok(())
    }

    async fn attempt(
        &self,
        request: &RoutingRequest,
        _table: &RouteTable,
    ) -> Option<ClassificationResult> {
        if request.prompt.trim().is_empty() {
            debug!("Embedding tier skipped: empty prompt");
            return None;
        }
        match self.classifier.classify(&request.prompt).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(tier = "embedding", error = %e, "Routing tier skipped");
                None
            }
        }
    }
}

/// Tier 3.
pub struct DecisionStage {
    engine: DecisionEngine,
}

impl DecisionStage {
    pub fn new(engine: DecisionEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for DecisionStage {
    fn tier(&self) -> Tier {
        Tier::Decision
    }

    async fn attempt(
        &self,
        request: &RoutingRequest,
        table: &RouteTable,
    ) -> Option<ClassificationResult> {
        if request.prompt.trim().is_empty() {
            debug!("Decision tier skipped: empty prompt");
            return None;
        }
        match self.engine.decide(&request.prompt, table.routes()).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(
                    tier = "decision",
                    model = self.engine.model(),
                    error = %e,
                    "Routing tier skipped"
                );
                None
            }
        }
    }
}

/// The configured fallback route.
pub struct DefaultStage;

#[async_trait]
impl Stage for DefaultStage {
    fn tier(&self) -> Tier {
        Tier::Default
    }

    async fn attempt(
        &self,
        _request: &RoutingRequest,
        table: &RouteTable,
    ) -> Option<ClassificationResult> {
        Some(default_result(table))
    }
}

fn default_result(table: &RouteTable) -> ClassificationResult {
    ClassificationResult::decided(table.default_route().name.clone(), 0.0, Tier::Default)
        .with_reasoning("default route")
}

/// How one stage ended for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StageOutcome {
    Decided { route: String, confidence: f32 },
    Borderline { confidence: f32 },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTrace {
    pub tier: Tier,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// A request that has been routed.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub result: ClassificationResult,
    pub route: Route,
    /// The prompt with the directive removed, when a directive was present
    pub rewritten_prompt: Option<String>,
    pub trace: Vec<StageTrace>,
}

#[derive(Debug, Clone)]
pub enum Routed {
    /// `<prefix> help`: answer in-band, no backend call
    Help(String),
    Decided(RoutingDecision),
}

pub struct Router {
    table: SharedRouteTable,
    stages: Vec<Box<dyn Stage>>,
}

impl Router {
    /// Build a router over `stages`, checking each against the table.
    ///
    /// A [`DefaultStage`] is appended when the list does not end with one.
    pub fn new(
        table: SharedRouteTable,
        mut stages: Vec<Box<dyn Stage>>,
    ) -> Result<Self, ConfigError> {
        if stages.last().map(|s| s.tier()) != Some(Tier::Default) {
            stages.push(Box::new(DefaultStage));
        }
        let current = table.load();
        for stage in &stages {
            stage.check(&current)?;
        }
        Ok(Self { table, stages })
    }

    /// Build the full cascade from configuration.
    ///
    /// Missing optional pieces (no embedding model, no centroid file, no
    /// decision model) leave their tier out. A centroid category that is
    /// not a route is fatal.
    pub fn from_config(config: &AppConfig, providers: &ProviderSet) -> Result<Self, ConfigError> {
        let table = RouteTable::from_config(config)?;
        let tiers = &config.routing.tiers;
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();

        if tiers.override_enabled {
            stages.push(Box::new(OverrideStage));
        }

        if tiers.embedding {
            if let Some(classifier) = embedding_classifier(config, providers) {
                stages.push(Box::new(EmbeddingStage::new(classifier)));
            }
        }

        if tiers.decision {
            match &providers.decision {
                Some(endpoint) => {
                    let engine = DecisionEngine::new(
                        endpoint.clone(),
                        Duration::from_millis(config.decision.timeout_ms),
                        config.decision.max_tokens,
                    );
                    stages.push(Box::new(DecisionStage::new(engine)));
                }
                None => info!("Decision tier disabled: no decision model configured"),
            }
        }

        let router = Self::new(SharedRouteTable::new(table), stages)?;
        info!(tiers = ?router.tiers(), "Routing cascade ready");
        Ok(router)
    }

    /// The tiers in cascade order.
    pub fn tiers(&self) -> Vec<Tier> {
        self.stages.iter().map(|s| s.tier()).collect()
    }

    pub fn table(&self) -> &SharedRouteTable {
        &self.table
    }

    /// Replace the route table from `config`.
    ///
    /// The new table must pass config validation and every stage's check;
    /// otherwise the current table stays in place.
    pub fn reload(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let table = RouteTable::from_config(config)?;
        for stage in &self.stages {
            stage.check(&table)?;
        }
        let routes = table.routes().len();
        self.table.store(table);
        info!(routes, "Route table reloaded");
        Ok(())
    }

    /// Route one prompt.
    pub async fn route(&self, text: &str) -> Routed {
        let table = self.table.load();

        let parsed = if self.stages.iter().any(|s| s.tier() == Tier::Override) {
            table.overrides().parse(text)
        } else {
            ParsedOverride::Absent
        };

        let request = match parsed {
            ParsedOverride::Help => {
                debug!("Override help requested");
                return Routed::Help(table.help_text());
            }
            ParsedOverride::Absent => RoutingRequest {
                prompt: text.to_string(),
                directive: None,
            },
            ParsedOverride::Directive(directive) => RoutingRequest {
                prompt: directive.prompt.clone(),
                directive: Some(directive),
            },
        };

        let mut trace = Vec::with_capacity(self.stages.len());
        let mut decided = None;
        for stage in &self.stages {
            let outcome = match stage.attempt(&request, &table).await {
                Some(result) => match &result.route {
                    Some(route) => {
                        let outcome = StageOutcome::Decided {
                            route: route.clone(),
                            confidence: result.confidence,
                        };
                        decided = Some(result);
                        outcome
                    }
                    None => StageOutcome::Borderline {
                        confidence: result.confidence,
                    },
                },
                None => StageOutcome::Skipped,
            };
            trace.push(StageTrace {
                tier: stage.tier(),
                outcome,
            });
            if decided.is_some() {
                break;
            }
        }

        let mut result = decided.unwrap_or_else(|| default_result(&table));
        if let Some(directive) = &request.directive {
            result.needs_tools.extend(directive.tools.iter().cloned());
        }

        let route = match result.route.as_deref().and_then(|name| table.resolve(name)) {
            Some(route) => route.clone(),
            None => {
                warn!(route = ?result.route, "Route missing from table, using default");
                result.route = Some(table.default_route().name.clone());
                table.default_route().clone()
            }
        };

        info!(
            route = %route.name,
            model = %route.backend_model_id,
            tier = %result.tier,
            confidence = result.confidence,
            tools = ?result.needs_tools,
            "Request routed"
        );

        Routed::Decided(RoutingDecision {
            result,
            route,
            rewritten_prompt: request.directive.map(|_| request.prompt),
            trace,
        })
    }
}

fn embedding_classifier(
    config: &AppConfig,
    providers: &ProviderSet,
) -> Option<EmbeddingClassifier> {
    let Some(endpoint) = &providers.embedding else {
        info!("Embedding tier disabled: no embedding model configured");
        return None;
    };
    let Some(path) = &config.embedding.centroids_path else {
        info!("Embedding tier disabled: no centroid file configured");
        return None;
    };

    let centroids = match CentroidSet::load(path) {
        Ok(centroids) => centroids,
        Err(e) => {
            warn!(error = %e, "Embedding tier disabled: centroids unavailable");
            return None;
        }
    };

    if centroids.model() != endpoint.model {
        warn!(
            centroids_model = centroids.model(),
            embedding_model = %endpoint.model,
            "Embedding tier disabled: centroids were built with a different model"
        );
        return None;
    }

    debug!(
        path = %path.display(),
        dimension = centroids.dimension(),
        "Centroids loaded"
    );
    Some(EmbeddingClassifier::new(
        endpoint.clone(),
        centroids,
        config.routing.borderline_threshold,
        Duration::from_millis(config.embedding.timeout_ms),
    ))
}
