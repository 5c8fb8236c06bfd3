//! Error types for the RelayClaw domain, one enum per bounded context:
//!
//! - [`TierError`]: a classification tier could not produce a result
//!   (always converted into cascade fallthrough, never shown to clients)
//! - [`ProviderError`]: backend / embedding / decision HTTP failures,
//!   including mid-stream disconnects
//! - [`PersistenceError`]: structured or similarity store write failures
//! - [`ToolError`]: forced tool invocation failures

use thiserror::Error;

/// Any failure inside the proxy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("routing tier failed: {0}")]
    Tier(#[from] TierError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("tool failed: {0}")]
    Tool(#[from] ToolError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failed call to an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Non-success HTTP status from the endpoint
    #[error("endpoint returned {status_code}: {message}")]
    ApiError { status_code: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("endpoint rejected credentials: {0}")]
    AuthenticationFailed(String),

    #[error("model not served: {0}")]
    ModelNotFound(String),

    /// The stream broke after the response started
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("endpoint not configured: {0}")]
    NotConfigured(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, DNS failure, reset before the first byte
    #[error("network error: {0}")]
    Network(String),
}

/// A soft failure inside one classification tier.
///
/// Tiers catch these locally, log them, and report "skipped" so the
/// cascade falls through to the next stage.
#[derive(Debug, Clone, Error)]
pub enum TierError {
    #[error("{tier} provider unavailable: {reason}")]
    Unavailable { tier: &'static str, reason: String },

    #[error("{tier} call timed out after {after_ms}ms")]
    Timeout { tier: &'static str, after_ms: u64 },

    #[error("malformed {tier} output: {reason}")]
    Malformed { tier: &'static str, reason: String },

    #[error("{tier} chose unknown route '{route}'")]
    UnknownRoute { tier: &'static str, route: String },

    #[error(
        "embedding dimension mismatch: centroids are {expected}-d, provider returned {actual}-d"
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The store could not be opened or reached
    #[error("store unavailable: {0}")]
    Storage(String),

    #[error("store query failed: {0}")]
    QueryFailed(String),

    /// The embedding call for an index job failed
    #[error("turn embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("schema setup failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no tool registered as '{0}'")]
    NotFound(String),

    #[error("tool '{tool_name}' failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}
