//! Stream interceptor: relays backend SSE to the client while keeping a
//! copy of the text for persistence.
//!
//! ```text
//! backend ──ChunkReceiver──► pump ──mpsc──► Sse ──► client
//!                             │
//!                             └─ accumulator ──► PersistenceWriter (on [DONE] only)
//! ```
//!
//! Every chunk is forwarded as soon as it arrives. The assistant turn is
//! written only after the backend completed and the response body took
//! `[DONE]` off the channel. A
//! backend error ends the stream with an error event and no `[DONE]`; a
//! client disconnect stops reading the backend. In both cases the
//! accumulated text is discarded.

use axum::response::sse::{Event, Sse};
use relayclaw_core::classification::Tier;
use relayclaw_core::error::ProviderError;
use relayclaw_core::provider::{ChunkReceiver, StreamChunk};
use relayclaw_core::turn::ConversationTurn;
use relayclaw_core::wire::{Direction, WireEvent};
use relayclaw_memory::PersistenceWriter;
use relayclaw_wiretap::Wiretap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const DONE: &str = "[DONE]";

/// Where a finished stream's turn goes.
#[derive(Clone)]
pub struct TurnSink {
    pub conversation_id: String,
    /// Backend model id the request was routed to
    pub model: String,
    pub tier: Tier,
    pub writer: Arc<PersistenceWriter>,
    pub wiretap: Arc<Wiretap>,
}

/// How a relayed stream ended.
#[derive(Debug)]
pub enum RelayOutcome {
    Completed {
        content: String,
        completion_tokens: Option<u32>,
    },
    BackendFailed(ProviderError),
    ClientDisconnected,
}

impl RelayOutcome {
    fn status(&self) -> &'static str {
        match self {
            RelayOutcome::Completed { .. } => "complete",
            RelayOutcome::BackendFailed(_) => "incomplete",
            RelayOutcome::ClientDisconnected => "client_disconnected",
        }
    }
}

pub type EventStream = ReceiverStream<Result<Event, Infallible>>;

/// Relay `upstream` to the client as an SSE response.
pub fn relay(upstream: ChunkReceiver, sink: TurnSink) -> Sse<EventStream> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let outcome = pump(upstream, tx, &sink.model).await;
        finish(outcome, &sink).await;
    });
    Sse::new(ReceiverStream::new(rx))
}

/// Forward chunks until the backend finishes, fails, or the client leaves.
pub async fn pump(
    mut upstream: ChunkReceiver,
    tx: mpsc::Sender<Result<Event, Infallible>>,
    model: &str,
) -> RelayOutcome {
    let mut content = String::new();
    let mut completion_tokens = None;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => return RelayOutcome::ClientDisconnected,
            next = upstream.recv() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = tx.send(Ok(error_event(&e))).await;
                return RelayOutcome::BackendFailed(e);
            }
            None => {
                let e = ProviderError::StreamInterrupted(
                    "backend stream ended without completion".into(),
                );
                let _ = tx.send(Ok(error_event(&e))).await;
                return RelayOutcome::BackendFailed(e);
            }
        };

        if let Some(text) = &chunk.content {
            content.push_str(text);
        }
        if let Some(usage) = &chunk.usage {
            completion_tokens = Some(usage.completion_tokens);
        }

        if let Some(event) = chunk_event(&chunk, model) {
            if tx.send(Ok(event)).await.is_err() {
                return RelayOutcome::ClientDisconnected;
            }
        }

        if chunk.done {
            if tx.send(Ok(Event::default().data(DONE))).await.is_err() {
                return RelayOutcome::ClientDisconnected;
            }
            // Queued is not delivered: wait for the response body to drain
            // the channel. A client that leaves first closes it instead.
            if tx.reserve_many(tx.max_capacity()).await.is_err() {
                return RelayOutcome::ClientDisconnected;
            }
            return RelayOutcome::Completed {
                content,
                completion_tokens,
            };
        }
    }
}

/// The client-facing frame for a chunk: the backend's own payload when it
/// has one, otherwise a synthesized OpenAI delta.
fn chunk_event(chunk: &StreamChunk, model: &str) -> Option<Event> {
    if let Some(raw) = &chunk.raw {
        return Some(Event::default().data(raw.as_str()));
    }
    let text = chunk.content.as_deref().filter(|t| !t.is_empty())?;
    let delta = serde_json::json!({
        "id": crate::completion_id(),
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "role": "assistant", "content": text },
            "finish_reason": if chunk.done {
                serde_json::json!("stop")
            } else {
                serde_json::Value::Null
            },
        }],
    });
    Some(Event::default().data(delta.to_string()))
}

fn error_event(error: &ProviderError) -> Event {
    let body = serde_json::json!({
        "error": {
            "message": error.to_string(),
            "type": "backend_error",
        }
    });
    Event::default().data(body.to_string())
}

async fn finish(outcome: RelayOutcome, sink: &TurnSink) {
    let length = match &outcome {
        RelayOutcome::Completed { content, .. } => content.len(),
        _ => 0,
    };
    sink.wiretap.emit(
        WireEvent::new(Direction::Outbound, "assistant", &sink.conversation_id, &sink.model, length)
            .tier(sink.tier)
            .status(outcome.status()),
    );

    match outcome {
        RelayOutcome::Completed {
            content,
            completion_tokens,
        } => {
            let turn = ConversationTurn::assistant(
                &sink.conversation_id,
                &sink.model,
                content,
                completion_tokens,
            );
            if sink.writer.write_turn(&turn).await {
                sink.writer.index_turn(&turn);
            }
            debug!(conversation_id = %sink.conversation_id, chars = length, "Stream completed");
        }
        RelayOutcome::BackendFailed(e) => {
            warn!(
                conversation_id = %sink.conversation_id,
                error = %e,
                "Backend stream failed, turn discarded"
            );
        }
        RelayOutcome::ClientDisconnected => {
            info!(conversation_id = %sink.conversation_id, "Client disconnected, turn discarded");
        }
    }
}
