//! OpenAI-compatible chat and model endpoints.
//!
//! - `POST /v1/chat/completions` (and `/chat/completions`): route, rewrite,
//!   forward, relay, persist
//! - `GET  /v1/models` (and `/models`): the backend listing, untouched

use crate::interceptor::{self, TurnSink};
use crate::{ApiError, SharedState};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use relayclaw_core::message::{ChatMessage, ChatRequest, ConversationId};
use relayclaw_core::provider::ProviderRequest;
use relayclaw_core::turn::ConversationTurn;
use relayclaw_core::wire::{Direction, WireEvent};
use relayclaw_routing::{Routed, RoutingDecision};
use std::convert::Infallible;
use tracing::{debug, info, warn};

/// Header carrying the conversation id in both directions.
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// Model name reported on the in-band help response.
pub const HELP_MODEL: &str = "relayclaw/help";

pub async fn chat_completions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(mut request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return ApiError::rejected(rejection.status(), rejection.body_text()).into_response();
        }
    };

    let conversation_id = conversation_id(&headers, &request);
    let text = request.last_user_text().unwrap_or_default();
    info!(
        conversation_id = %conversation_id,
        stream = request.stream,
        messages = request.messages.len(),
        "Chat completion request"
    );

    state.wiretap.emit(WireEvent::new(
        Direction::Inbound,
        "user",
        &conversation_id,
        &request.model,
        text.len(),
    ));

    let decision = match state.router.route(&text).await {
        Routed::Help(help) => {
            state.wiretap.emit(
                WireEvent::new(
                    Direction::Outbound,
                    "assistant",
                    &conversation_id,
                    HELP_MODEL,
                    help.len(),
                )
                .status("help"),
            );
            let response = if request.stream {
                help_stream(help).into_response()
            } else {
                Json(help_completion(&help)).into_response()
            };
            return with_conversation(response, &conversation_id);
        }
        Routed::Decided(decision) => decision,
    };

    let route = &decision.route;
    state.wiretap.emit(
        WireEvent::new(Direction::Internal, "router", &conversation_id, &route.backend_model_id, 0)
            .tier(decision.result.tier),
    );

    let prompt = decision.rewritten_prompt.clone().unwrap_or(text);
    if let (Some(rewritten), Some(index)) =
        (&decision.rewritten_prompt, request.last_user_index())
    {
        request.messages[index].set_text(rewritten.as_str());
    }

    inject_tool_context(&state, &mut request, &decision, &prompt, &conversation_id).await;

    let user_turn = ConversationTurn::user(&conversation_id, &route.name, prompt);
    if state.writer.write_turn(&user_turn).await {
        state.writer.index_turn(&user_turn);
    }

    let backend_request = ProviderRequest::from_chat(&request, &route.backend_model_id);
    let response = if request.stream {
        stream_completion(&state, backend_request, &decision, &conversation_id).await
    } else {
        complete(&state, backend_request, &decision, &conversation_id).await
    };
    with_conversation(response, &conversation_id)
}

async fn complete(
    state: &SharedState,
    request: ProviderRequest,
    decision: &RoutingDecision,
    conversation_id: &str,
) -> Response {
    let model = decision.route.backend_model_id.as_str();
    let response = match state.backend.complete(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(conversation_id, model, error = %e, "Backend request failed");
            state.wiretap.emit(
                WireEvent::new(Direction::Outbound, "assistant", conversation_id, model, 0)
                    .tier(decision.result.tier)
                    .status("backend_error"),
            );
            return ApiError::backend(&e).into_response();
        }
    };

    let content = response.message.text();
    state.wiretap.emit(
        WireEvent::new(Direction::Outbound, "assistant", conversation_id, model, content.len())
            .tier(decision.result.tier)
            .status("complete"),
    );

    let body = if response.raw.is_null() {
        completion_body(&response.model, &response.message, response.usage.as_ref())
    } else {
        response.raw.clone()
    };

    let completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens);
    let turn = ConversationTurn::assistant(conversation_id, model, content, completion_tokens);
    if state.writer.write_turn(&turn).await {
        state.writer.index_turn(&turn);
    }

    Json(body).into_response()
}

async fn stream_completion(
    state: &SharedState,
    request: ProviderRequest,
    decision: &RoutingDecision,
    conversation_id: &str,
) -> Response {
    let model = decision.route.backend_model_id.clone();
    let upstream = match state.backend.stream(request).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(conversation_id, model = %model, error = %e, "Backend stream failed to open");
            state.wiretap.emit(
                WireEvent::new(Direction::Outbound, "assistant", conversation_id, &model, 0)
                    .tier(decision.result.tier)
                    .status("backend_error"),
            );
            return ApiError::backend(&e).into_response();
        }
    };

    interceptor::relay(
        upstream,
        TurnSink {
            conversation_id: conversation_id.to_string(),
            model,
            tier: decision.result.tier,
            writer: state.writer.clone(),
            wiretap: state.wiretap.clone(),
        },
    )
    .into_response()
}

/// Invoke every forced tool that exists and put their output in one
/// system message just before the last user message.
async fn inject_tool_context(
    state: &SharedState,
    request: &mut ChatRequest,
    decision: &RoutingDecision,
    prompt: &str,
    conversation_id: &str,
) {
    let mut sections = Vec::new();

    for name in &decision.result.needs_tools {
        if state.tools.get(name).is_none() {
            debug!(tool = %name, "Forced tool not registered, skipping");
            continue;
        }

        let event = WireEvent::new(
            Direction::Internal,
            "tool",
            conversation_id,
            &decision.route.backend_model_id,
            0,
        )
        .tool(name.as_str());
        match state.tools.invoke(name, prompt).await {
            Ok(output) => {
                state.wiretap.emit(WireEvent {
                    content_length: output.len(),
                    ..event.status("ok")
                });
                sections.push(format!("[{name}]\n{output}"));
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Forced tool failed");
                state.wiretap.emit(event.status("failed"));
            }
        }
    }

    if !sections.is_empty() {
        request.insert_context(ChatMessage::system(format!(
            "Context gathered for this request:\n\n{}",
            sections.join("\n\n")
        )));
    }
}

pub async fn list_models(State(state): State<SharedState>) -> Response {
    match state.backend.models().await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => {
            warn!(error = %e, "Model listing failed");
            ApiError::backend(&e).into_response()
        }
    }
}

fn conversation_id(headers: &HeaderMap, request: &ChatRequest) -> String {
    headers
        .get(CONVERSATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            request
                .conversation_id
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| ConversationId::new().to_string())
}

fn with_conversation(mut response: Response, conversation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(conversation_id) {
        response.headers_mut().insert(CONVERSATION_HEADER, value);
    }
    response
}

fn completion_body(
    model: &str,
    message: &ChatMessage,
    usage: Option<&relayclaw_core::provider::Usage>,
) -> serde_json::Value {
    let usage = usage.map(|u| {
        serde_json::json!({
            "prompt_tokens": u.prompt_tokens,
            "completion_tokens": u.completion_tokens,
            "total_tokens": u.total_tokens,
        })
    });
    serde_json::json!({
        "id": crate::completion_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": message.text() },
            "finish_reason": "stop",
        }],
        "usage": usage,
    })
}

fn help_completion(help: &str) -> serde_json::Value {
    completion_body(HELP_MODEL, &ChatMessage::assistant(help), None)
}

fn help_stream(help: String) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let delta = serde_json::json!({
        "id": crate::completion_id(),
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": HELP_MODEL,
        "choices": [{
            "index": 0,
            "delta": { "role": "assistant", "content": help },
            "finish_reason": "stop",
        }],
    });
    let events = vec![
        Ok(Event::default().data(delta.to_string())),
        Ok(Event::default().data("[DONE]")),
    ];
    Sse::new(futures::stream::iter(events))
}
