//! Configuration loading, validation, and management for RelayClaw.
//!
//! Loads configuration from `~/.relayclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup; a config that
//! fails validation is fatal and the proxy refuses to serve.

use relayclaw_core::Route;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.relayclaw/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// The inference backend every routed request is forwarded to
    #[serde(default)]
    pub backend: BackendConfig,

    /// Route table: name → backend model id
    #[serde(default = "default_routes")]
    pub routes: Vec<Route>,

    /// Cascade settings
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Tier 1 directive syntax
    #[serde(default, rename = "override")]
    pub overrides: OverrideConfig,

    /// Embedding provider (Tier 2 and background indexing)
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Small decision model (Tier 3)
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Conversation and similarity stores
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// JSON-lines audit log
    #[serde(default)]
    pub wiretap: WiretapConfig,
}

fn default_routes() -> Vec<Route> {
    vec![
        Route::new("simple", "llama3.2:3b", "Short factual answers and chit-chat"),
        Route::new("complex", "qwen2.5:14b", "Multi-step reasoning and long-form writing"),
        Route::new("code", "qwen2.5-coder:7b", "Writing, reviewing and explaining code"),
    ]
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

fn default_port() -> u16 {
    8642
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    4 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit: default_body_limit(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// OpenAI-compatible base URL (up to and including `/v1`)
    #[serde(default = "default_backend_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_backend_url() -> String {
    "http://localhost:11434/v1".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Route used when no tier decides
    #[serde(default = "default_route")]
    pub default_route: String,

    /// Minimum Tier 2 margin to accept an embedding decision
    #[serde(default = "default_borderline_threshold")]
    pub borderline_threshold: f32,

    #[serde(default)]
    pub tiers: TierToggles,
}

fn default_route() -> String {
    "simple".into()
}
fn default_borderline_threshold() -> f32 {
    0.04
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_route: default_route(),
            borderline_threshold: default_borderline_threshold(),
            tiers: TierToggles::default(),
        }
    }
}

/// Per-tier enable flags. A tier that is enabled but unconfigured is
/// still skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierToggles {
    #[serde(default = "default_true", rename = "override")]
    pub override_enabled: bool,

    #[serde(default = "default_true")]
    pub embedding: bool,

    #[serde(default = "default_true")]
    pub decision: bool,
}

impl Default for TierToggles {
    fn default() -> Self {
        Self {
            override_enabled: true,
            embedding: true,
            decision: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// Directive prefix, matched case-insensitively
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Alias → route name. Route names are always accepted as-is.
    #[serde(default = "default_route_aliases")]
    pub route_aliases: BTreeMap<String, String>,

    /// Alias → tool name
    #[serde(default = "default_tool_aliases")]
    pub tool_aliases: BTreeMap<String, String>,
}

fn default_prefix() -> String {
    "z:".into()
}

fn default_route_aliases() -> BTreeMap<String, String> {
    [("fast", "simple"), ("deep", "complex"), ("think", "complex"), ("dev", "code")]
        .into_iter()
        .map(|(a, r)| (a.to_string(), r.to_string()))
        .collect()
}

fn default_tool_aliases() -> BTreeMap<String, String> {
    [("search", "search"), ("web", "search"), ("rag", "rag"), ("recall", "rag")]
        .into_iter()
        .map(|(a, t)| (a.to_string(), t.to_string()))
        .collect()
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            route_aliases: default_route_aliases(),
            tool_aliases: default_tool_aliases(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model id; unset disables Tier 2 and indexing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Base URL; defaults to the backend URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,

    /// Precomputed centroid file; unset means Tier 2 is always skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroids_path: Option<PathBuf>,
}

fn default_embedding_timeout_ms() -> u64 {
    2000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: None,
            url: None,
            api_key: None,
            timeout_ms: default_embedding_timeout_ms(),
            centroids_path: None,
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("model", &self.model)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_ms", &self.timeout_ms)
            .field("centroids_path", &self.centroids_path)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Decision model id; unset disables Tier 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Base URL; defaults to the backend URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_decision_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_decision_max_tokens")]
    pub max_tokens: u32,
}

fn default_decision_timeout_ms() -> u64 {
    5000
}
fn default_decision_max_tokens() -> u32 {
    256
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            model: None,
            url: None,
            api_key: None,
            timeout_ms: default_decision_timeout_ms(),
            max_tokens: default_decision_max_tokens(),
        }
    }
}

impl std::fmt::Debug for DecisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionConfig")
            .field("model", &self.model)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite file; defaults to `~/.relayclaw/relayclaw.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Whether completed turns are embedded into the similarity store
    #[serde(default = "default_true")]
    pub index: bool,

    #[serde(default = "default_index_workers")]
    pub index_workers: usize,

    /// Bounded index queue capacity; a full queue drops jobs
    #[serde(default = "default_index_queue")]
    pub index_queue: usize,

    #[serde(default = "default_max_attempts")]
    pub index_max_attempts: u32,

    #[serde(default = "default_max_attempts")]
    pub write_max_attempts: u32,

    /// Earlier turns the `rag` tool injects at most
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Minimum cosine similarity for a recalled turn
    #[serde(default = "default_recall_min_score")]
    pub recall_min_score: f32,
}

fn default_index_workers() -> usize {
    2
}
fn default_index_queue() -> usize {
    256
}
fn default_max_attempts() -> u32 {
    3
}
fn default_recall_limit() -> usize {
    3
}
fn default_recall_min_score() -> f32 {
    0.5
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database: None,
            index: true,
            index_workers: default_index_workers(),
            index_queue: default_index_queue(),
            index_max_attempts: default_max_attempts(),
            write_max_attempts: default_max_attempts(),
            recall_limit: default_recall_limit(),
            recall_min_score: default_recall_min_score(),
        }
    }
}

impl PersistenceConfig {
    /// The resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("relayclaw.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiretapConfig {
    /// Append-only JSON-lines file; unset disables the wiretap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Event channel capacity; a full channel drops events
    #[serde(default = "default_wiretap_buffer")]
    pub buffer: usize,
}

fn default_wiretap_buffer() -> usize {
    1024
}

impl Default for WiretapConfig {
    fn default() -> Self {
        Self {
            path: None,
            buffer: default_wiretap_buffer(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.relayclaw/config.toml)
    /// and apply environment overrides:
    /// - `RELAYCLAW_BACKEND_URL`
    /// - `RELAYCLAW_API_KEY`
    /// - `RELAYCLAW_DEFAULT_ROUTE`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RELAYCLAW_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("RELAYCLAW_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(route) = lookup("RELAYCLAW_DEFAULT_ROUTE") {
            self.routing.default_route = route;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".relayclaw")
    }

    /// Look up a route by name.
    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError("route table is empty".into()));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.name.trim().is_empty() || route.backend_model_id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "routes need a non-empty name and backend_model_id".into(),
                ));
            }
            // Override directives match route names case-insensitively.
            if !seen.insert(route.name.to_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate route name '{}'",
                    route.name
                )));
            }
        }

        if self.route(&self.routing.default_route).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default_route '{}' is not in the route table",
                self.routing.default_route
            )));
        }

        for (alias, target) in &self.overrides.route_aliases {
            if self.route(target).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "route alias '{alias}' points at unknown route '{target}'"
                )));
            }
        }

        if self.overrides.prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError("override prefix must not be empty".into()));
        }

        if !(0.0..=1.0).contains(&self.routing.borderline_threshold) {
            return Err(ConfigError::ValidationError(
                "borderline_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.embedding.timeout_ms == 0 || self.decision.timeout_ms == 0 {
            return Err(ConfigError::ValidationError("tier timeouts must be > 0".into()));
        }

        if self.decision.max_tokens == 0 {
            return Err(ConfigError::ValidationError("decision.max_tokens must be > 0".into()));
        }

        let p = &self.persistence;
        if p.index_workers == 0 || p.index_queue == 0 {
            return Err(ConfigError::ValidationError(
                "index_workers and index_queue must be > 0".into(),
            ));
        }
        if p.index_max_attempts == 0 || p.write_max_attempts == 0 {
            return Err(ConfigError::ValidationError("retry attempts must be > 0".into()));
        }

        if self.wiretap.buffer == 0 {
            return Err(ConfigError::ValidationError("wiretap.buffer must be > 0".into()));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            backend: BackendConfig::default(),
            routes: default_routes(),
            routing: RoutingConfig::default(),
            overrides: OverrideConfig::default(),
            embedding: EmbeddingConfig::default(),
            decision: DecisionConfig::default(),
            persistence: PersistenceConfig::default(),
            wiretap: WiretapConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
