//! End-to-end integration tests for the RelayClaw proxy.
//!
//! These tests drive the full pipeline over HTTP: routing cascade,
//! backend relay, SQLite persistence, similarity indexing and the
//! wiretap file, with scripted model endpoints standing in for the
//! backend and the embedding provider.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relayclaw_config::AppConfig;
use relayclaw_core::error::ProviderError;
use relayclaw_core::message::{ChatMessage, Role};
use relayclaw_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest,
    ProviderResponse, StreamChunk,
};
use relayclaw_core::store::{SimilarityStore, TurnStore};
use relayclaw_core::tool::ToolRegistry;
use relayclaw_core::turn::TurnRole;
use relayclaw_gateway::{GatewayState, build_router};
use relayclaw_memory::{IndexTarget, PersistenceWriter, RecallTool, SqliteStore, WriterSettings};
use relayclaw_providers::{ModelEndpoint, ProviderSet};
use relayclaw_routing::Router;
use relayclaw_wiretap::Wiretap;
use tower::ServiceExt;

const EMBED_MODEL: &str = "embed-e2e";

// ── Scripted endpoints ───────────────────────────────────────────────────

/// A backend that streams `chunks`, optionally forever, pausing between
/// chunks.
#[derive(Clone)]
struct ScriptedBackend {
    chunks: Vec<String>,
    endless: bool,
    pause: Duration,
    models_requested: Arc<Mutex<Vec<String>>>,
    system_prompts: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedBackend {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            endless: false,
            pause: Duration::ZERO,
            models_requested: Arc::new(Mutex::new(Vec::new())),
            system_prompts: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn endless(chunk: &str, pause: Duration) -> Self {
        Self {
            endless: true,
            pause,
            ..Self::new(&[chunk])
        }
    }

    fn models_requested(&self) -> Vec<String> {
        self.models_requested.lock().unwrap().clone()
    }

    fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().unwrap().clone()
    }

    fn record(&self, request: &ProviderRequest) {
        self.models_requested.lock().unwrap().push(request.model.clone());
        self.system_prompts.lock().unwrap().extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(ChatMessage::text),
        );
    }

    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedBackend {
    fn name(&self) -> &str {
        "e2e_backend"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.record(&request);
        let text = self.chunks.concat();
        Ok(ProviderResponse {
            raw: serde_json::json!({
                "id": "chatcmpl-e2e",
                "object": "chat.completion",
                "model": request.model,
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": text},
                    "finish_reason": "stop"
                }]
            }),
            message: ChatMessage::assistant(text),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.record(&request);
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let backend = self.clone();

        tokio::spawn(async move {
            loop {
                for text in &backend.chunks {
                    let chunk = StreamChunk {
                        content: Some(text.clone()),
                        raw: Some(
                            serde_json::json!({"choices": [{"delta": {"content": text}}]})
                                .to_string(),
                        ),
                        done: false,
                        usage: None,
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        backend.cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                    tokio::time::sleep(backend.pause).await;
                }
                if !backend.endless {
                    break;
                }
            }
            let done = StreamChunk {
                content: None,
                raw: None,
                done: true,
                usage: None,
            };
            let _ = tx.send(Ok(done)).await;
        });

        Ok(rx)
    }
}

/// Returns the same vector for every input.
#[derive(Clone)]
struct FixedEmbedder {
    vector: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl FixedEmbedder {
    fn new(vector: &[f32]) -> Self {
        Self {
            vector: vector.to_vec(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for FixedEmbedder {
    fn name(&self) -> &str {
        "e2e_embedder"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("embedding only".into()))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|_| self.vector.clone()).collect(),
            model: request.model,
            usage: None,
        })
    }
}

// ── Proxy assembly ───────────────────────────────────────────────────────

struct Proxy {
    app: axum::Router,
    router: Arc<Router>,
    store: Arc<SqliteStore>,
    writer: Arc<PersistenceWriter>,
    wiretap: Arc<Wiretap>,
    wiretap_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn base_config(dir: &std::path::Path) -> AppConfig {
    let centroids = dir.join("centroids.json");
    std::fs::write(
        &centroids,
        format!(
            r#"{{"model": "{EMBED_MODEL}", "dimension": 2,
                "centroids": {{"simple": [1, 0], "complex": [0, 1]}}}}"#
        ),
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.embedding.model = Some(EMBED_MODEL.into());
    config.embedding.centroids_path = Some(centroids);
    config
}

async fn proxy(backend: &ScriptedBackend, embedder: &FixedEmbedder) -> Proxy {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());

    let providers = ProviderSet {
        backend: Arc::new(backend.clone()),
        embedding: Some(ModelEndpoint::new(Arc::new(embedder.clone()), EMBED_MODEL)),
        decision: None,
    };
    let router = Arc::new(Router::from_config(&config, &providers).unwrap());

    let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let index = IndexTarget {
        store: store.clone(),
        embedder: Arc::new(embedder.clone()),
        model: EMBED_MODEL.into(),
    };
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(RecallTool::new(
        index.clone(),
        config.persistence.recall_limit,
        config.persistence.recall_min_score,
        Duration::from_secs(1),
    )));
    let writer = Arc::new(PersistenceWriter::new(
        store.clone(),
        Some(index),
        WriterSettings::default(),
    ));

    let wiretap_path = dir.path().join("wire.jsonl");
    let wiretap = Arc::new(Wiretap::open(&wiretap_path, 64).await.unwrap());

    let state = Arc::new(GatewayState {
        router: router.clone(),
        backend: providers.backend.clone(),
        tools,
        writer: writer.clone(),
        wiretap: wiretap.clone(),
    });

    Proxy {
        app: build_router(state, 1024 * 1024),
        router,
        store,
        writer,
        wiretap,
        wiretap_path,
        _dir: dir,
    }
}

fn chat_request(prompt: &str, stream: bool, conversation: &str) -> Request<Body> {
    let body = serde_json::json!({
        "model": "auto",
        "stream": stream,
        "messages": [{"role": "user", "content": prompt}]
    });
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-conversation-id", conversation)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_embedding_routed_request_is_persisted_indexed_and_wiretapped() {
    let backend = ScriptedBackend::new(&["Proof by induction."]);
    // margin 0.8 towards "complex"
    let embedder = FixedEmbedder::new(&[0.1, 0.9]);
    let proxy = proxy(&backend, &embedder).await;

    let response = proxy
        .app
        .clone()
        .oneshot(chat_request("Prove the sum formula", false, "conv-e2e"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-conversation-id"], "conv-e2e");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "chatcmpl-e2e");
    assert_eq!(json["choices"][0]["message"]["content"], "Proof by induction.");
    assert_eq!(backend.models_requested(), vec!["qwen2.5:14b".to_string()]);

    let turns = proxy.store.conversation("conv-e2e").await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].model_used, "complex");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].model_used, "qwen2.5:14b");
    assert_eq!(turns[1].content, "Proof by induction.");

    // Draining the writer finishes both index jobs
    proxy.writer.shutdown().await;
    assert_eq!(proxy.store.count().await.unwrap(), 2);
    for turn in &turns {
        assert!(proxy.store.contains(&turn.turn_id).await.unwrap());
    }

    proxy.wiretap.shutdown().await;
    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&proxy.wiretap_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["direction"], "inbound");
    assert!(lines.iter().any(|event| event["decision_tier"] == "embedding"));
    let last = lines.last().unwrap();
    assert_eq!(last["direction"], "outbound");
    assert_eq!(last["status"], "complete");
    assert_eq!(last["content_length"], "Proof by induction.".len());
}

#[tokio::test]
async fn e2e_override_stream_is_relayed_in_order() {
    let backend = ScriptedBackend::new(&["fn ", "main", "() {}"]);
    let embedder = FixedEmbedder::new(&[1.0, 0.0]);
    let proxy = proxy(&backend, &embedder).await;

    let response = proxy
        .app
        .clone()
        .oneshot(chat_request("z: dev Write an empty main", true, "conv-code"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let frames: Vec<&str> = text.lines().filter_map(|l| l.strip_prefix("data: ")).collect();
    assert_eq!(frames.len(), 4);
    assert!(frames[0].contains("fn "));
    assert!(frames[1].contains("main"));
    assert!(frames[2].contains("() {}"));
    assert_eq!(frames[3], "[DONE]");

    // The directive decided the route, so Tier 2 never ran
    assert_eq!(backend.models_requested(), vec!["qwen2.5-coder:7b".to_string()]);

    let store = proxy.store.clone();
    let mut turns = Vec::new();
    for _ in 0..100 {
        turns = store.conversation("conv-code").await.unwrap();
        if turns.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "Write an empty main");
    assert_eq!(turns[1].content, "fn main() {}");

    proxy.writer.shutdown().await;
    // no classification embed, one per indexed turn
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn e2e_client_disconnect_cancels_backend_and_discards_turn() {
    let backend = ScriptedBackend::endless("tick ", Duration::from_millis(5));
    let embedder = FixedEmbedder::new(&[1.0, 0.0]);
    let proxy = proxy(&backend, &embedder).await;

    let response = proxy
        .app
        .clone()
        .oneshot(chat_request("Count forever", true, "conv-gone"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("tick"));
    drop(body);

    wait_for(|| backend.cancelled()).await;
    assert_eq!(backend.models_requested(), vec!["llama3.2:3b".to_string()]);

    // Give the relay task time to settle, then check only the user turn exists
    tokio::time::sleep(Duration::from_millis(50)).await;
    let turns = proxy.store.conversation("conv-gone").await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, TurnRole::User);

    proxy.wiretap.shutdown().await;
    let log = std::fs::read_to_string(&proxy.wiretap_path).unwrap();
    assert!(log.contains(r#""status":"client_disconnected""#));
}

#[tokio::test]
async fn e2e_reloaded_route_table_serves_new_models() {
    let backend = ScriptedBackend::new(&["ok"]);
    let embedder = FixedEmbedder::new(&[1.0, 0.0]);
    let proxy = proxy(&backend, &embedder).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.routes[0].backend_model_id = "llama3.3:70b".into();
    proxy.router.reload(&config).unwrap();

    let response = proxy
        .app
        .clone()
        .oneshot(chat_request("hello", false, "conv-reload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.models_requested(), vec!["llama3.3:70b".to_string()]);

    // A table that drops a centroid category is rejected and the old one kept
    let mut broken = config.clone();
    broken.routes.retain(|route| route.name != "complex");
    assert!(proxy.router.reload(&broken).is_err());
    assert!(proxy.router.table().load().contains("complex"));
}

#[tokio::test]
async fn e2e_health_reports_live_counters() {
    let backend = ScriptedBackend::new(&["hi"]);
    let embedder = FixedEmbedder::new(&[1.0, 0.0]);
    let proxy = proxy(&backend, &embedder).await;

    proxy
        .app
        .clone()
        .oneshot(chat_request("hi", false, "conv-health"))
        .await
        .unwrap();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = proxy.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tiers"], serde_json::json!(["override", "embedding", "default"]));
    assert_eq!(json["persistence"]["turns_written"], 2);
}

#[tokio::test]
async fn e2e_rag_directive_recalls_indexed_turns() {
    let backend = ScriptedBackend::new(&["Use sort_unstable."]);
    let embedder = FixedEmbedder::new(&[0.9, 0.1]);
    let proxy = proxy(&backend, &embedder).await;

    let first = proxy
        .app
        .clone()
        .oneshot(chat_request("How do I sort a vec", false, "conv-first"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let mut indexed = 0;
    for _ in 0..100 {
        indexed = proxy.store.count().await.unwrap();
        if indexed >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(indexed, 2);
    assert!(backend.system_prompts().is_empty());

    let second = proxy
        .app
        .clone()
        .oneshot(chat_request("z: rag Sort it descending", false, "conv-second"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let context = backend.system_prompts();
    assert_eq!(context.len(), 1);
    assert!(context[0].contains("[rag]"));
    assert!(context[0].contains("How do I sort a vec"));
    assert!(context[0].contains("Use sort_unstable."));

    let turns = proxy.store.conversation("conv-second").await.unwrap();
    assert_eq!(turns[0].content, "Sort it descending");
}
