//! HTTP gateway for RelayClaw.
//!
//! Speaks the OpenAI chat-completion API to clients, routes each request
//! through the cascade, and relays the backend's answer unmodified.
//!
//! Built on Axum. No authentication: the proxy runs on a trusted network.

pub mod chat;
pub mod interceptor;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use relayclaw_config::GatewayConfig;
use relayclaw_core::classification::Tier;
use relayclaw_core::error::ProviderError;
use relayclaw_core::provider::Provider;
use relayclaw_core::tool::ToolRegistry;
use relayclaw_memory::{PersistenceStats, PersistenceWriter};
use relayclaw_routing::Router as RouteCascade;
use relayclaw_wiretap::{Wiretap, WiretapStats};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub router: Arc<RouteCascade>,
    pub backend: Arc<dyn Provider>,
    pub tools: ToolRegistry,
    pub writer: Arc<PersistenceWriter>,
    pub wiretap: Arc<Wiretap>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers: CORS for any origin (trusted network), a request body limit,
/// and HTTP trace logging.
pub fn build_router(state: SharedState, body_limit: usize) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(chat::CONVERSATION_HEADER)]);

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(chat::list_models))
        .route("/models", get(chat::list_models))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn start(
    state: SharedState,
    config: &GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config.body_limit);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    info!("Gateway stopped");

    Ok(())
}

/// An OpenAI-style error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    /// The request body could not be accepted.
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: "invalid_request_error",
            message: message.into(),
        }
    }

    /// The backend could not be reached or refused the request.
    pub fn backend(error: &ProviderError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            kind: "backend_error",
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "message": self.message,
                "type": self.kind,
                "code": self.status.as_u16(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    routes: usize,
    tiers: Vec<Tier>,
    wiretap: WiretapStats,
    persistence: PersistenceStats,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        routes: state.router.table().load().routes().len(),
        tiers: state.router.tiers(),
        wiretap: state.wiretap.stats(),
        persistence: state.writer.stats(),
    })
}

#[cfg(test)]
pub(crate) mod testing;
