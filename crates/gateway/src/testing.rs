//! Mock backend and state harness for gateway tests.

use crate::{GatewayState, SharedState};
use async_trait::async_trait;
use relayclaw_config::AppConfig;
use relayclaw_core::error::{ProviderError, ToolError};
use relayclaw_core::message::ChatMessage;
use relayclaw_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use relayclaw_core::tool::{Tool, ToolRegistry};
use relayclaw_memory::{InMemoryStore, PersistenceWriter, WriterSettings};
use relayclaw_providers::ProviderSet;
use relayclaw_routing::Router;
use relayclaw_wiretap::{MemorySink, Wiretap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Script {
    Reply(Vec<String>),
    FailMidStream(Vec<String>),
    Unreachable,
}

#[derive(Default)]
struct Record {
    calls: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
}

/// A backend that answers with scripted chunks.
#[derive(Clone)]
pub struct MockBackend {
    script: Script,
    record: Arc<Record>,
}

impl MockBackend {
    pub fn replying(text: &str) -> Self {
        Self::chunked(&[text])
    }

    pub fn chunked(chunks: &[&str]) -> Self {
        Self::with(Script::Reply(chunks.iter().map(|c| c.to_string()).collect()))
    }

    pub fn failing_after(chunks: &[&str]) -> Self {
        Self::with(Script::FailMidStream(chunks.iter().map(|c| c.to_string()).collect()))
    }

    pub fn unreachable() -> Self {
        Self::with(Script::Unreachable)
    }

    fn with(script: Script) -> Self {
        Self {
            script,
            record: Arc::new(Record::default()),
        }
    }

    pub fn calls(&self) -> usize {
        self.record.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.record.last_request.lock().unwrap().clone()
    }

    fn begin(&self, request: &ProviderRequest) -> Result<Vec<String>, ProviderError> {
        self.record.calls.fetch_add(1, Ordering::SeqCst);
        *self.record.last_request.lock().unwrap() = Some(request.clone());
        match &self.script {
            Script::Reply(chunks) | Script::FailMidStream(chunks) => Ok(chunks.clone()),
            Script::Unreachable => Err(ProviderError::Network("connection refused".into())),
        }
    }
}

fn delta_frame(text: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    })
    .to_string()
}

#[async_trait]
impl Provider for MockBackend {
    fn name(&self) -> &str {
        "mock_backend"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let text = self.begin(&request)?.concat();
        let raw = serde_json::json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "model": request.model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7}
        });
        Ok(ProviderResponse {
            message: ChatMessage::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 4,
                completion_tokens: 3,
                total_tokens: 7,
            }),
            model: request.model,
            raw,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let chunks = self.begin(&request)?;
        let fail = matches!(self.script, Script::FailMidStream(_));
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        tokio::spawn(async move {
            for text in chunks {
                let chunk = StreamChunk {
                    raw: Some(delta_frame(&text)),
                    content: Some(text),
                    done: false,
                    usage: None,
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let last = if fail {
                Err(ProviderError::StreamInterrupted("connection reset".into()))
            } else {
                Ok(StreamChunk {
                    content: None,
                    raw: None,
                    done: true,
                    usage: None,
                })
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }

    async fn models(&self) -> Result<serde_json::Value, ProviderError> {
        if matches!(self.script, Script::Unreachable) {
            return Err(ProviderError::Network("connection refused".into()));
        }
        Ok(serde_json::json!({
            "object": "list",
            "data": [{"id": "llama3.2:3b", "object": "model", "owned_by": "library"}]
        }))
    }
}

/// Returns a fixed result for any prompt.
pub struct StaticTool {
    pub name: &'static str,
    pub output: Result<&'static str, &'static str>,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "fixed output"
    }

    async fn invoke(&self, _prompt: &str) -> Result<String, ToolError> {
        self.output.map(str::to_string).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.name.to_string(),
            reason: reason.to_string(),
        })
    }
}

pub struct Harness {
    pub state: SharedState,
    pub backend: MockBackend,
    pub store: InMemoryStore,
    pub wire: MemorySink,
}

pub fn test_state(backend: MockBackend) -> Harness {
    let config = AppConfig::default();
    let providers = ProviderSet {
        backend: Arc::new(backend.clone()),
        embedding: None,
        decision: None,
    };
    let router = Router::from_config(&config, &providers).unwrap();

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(StaticTool {
        name: "search",
        output: Ok("Rust 1.90 was released."),
    }));
    tools.register(Arc::new(StaticTool {
        name: "rag",
        output: Err("index offline"),
    }));

    let store = InMemoryStore::new();
    let wire = MemorySink::new();
    let state = Arc::new(GatewayState {
        router: Arc::new(router),
        backend: providers.backend.clone(),
        tools,
        writer: Arc::new(PersistenceWriter::new(
            Arc::new(store.clone()),
            None,
            WriterSettings::default(),
        )),
        wiretap: Arc::new(Wiretap::new(Box::new(wire.clone()), 64)),
    });

    Harness {
        state,
        backend,
        store,
        wire,
    }
}
