//! OpenAI-compatible chat completions over the client pool.
//!
//! The handler validates, picks a session, rewrites the request for it,
//! registers the correlation waiter, forwards the frame, and turns the
//! eventual reply into an OpenAI response. Streaming is synthesized from the
//! completed reply: the client transport is not incremental, so the SSE body
//! is a re-chunking of a finished answer, not a live feed.

use std::convert::Infallible;

use {
    axum::{
        Json,
        extract::State,
        response::{
            IntoResponse, Response,
            sse::{Event, Sse},
        },
    },
    serde_json::json,
    tracing::{info, warn},
};

use {
    switchboard_common::time::{rfc3339_now, unix_now},
    switchboard_protocol::{
        ClientBoundFrame, REQUEST_ID_PREFIX, SSE_CONTENT_CHUNK_CHARS,
        openai::{
            AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
            Choice, ChunkChoice, ChunkDelta, ModelList, Usage,
        },
    },
};

use crate::{
    correlate::ReplyError,
    decode::{DecodedReply, decode_reply},
    error::ApiError,
    rewrite::rewrite_request,
    server::AppState,
};

pub async fn list_models_handler(State(app): State<AppState>) -> impl IntoResponse {
    Json(ModelList::new(app.models.as_ref().clone()))
}

pub async fn chat_completions_handler(
    State(app): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    request.validate().map_err(ApiError::Validation)?;

    let request_id = new_request_id();
    if let Some(sink) = &app.gateway.debug_logs {
        sink.capture(
            &request_id,
            "request",
            &json!({
                "timestamp": rfc3339_now(),
                "request_id": request_id,
                "data": request,
            }),
        );
    }

    let client_id = app
        .gateway
        .pick_client()
        .await
        .ok_or(ApiError::ServiceUnavailable)?;
    info!(request_id = %request_id, client_id = %client_id, "forwarding completion");

    // The session can drop between selection and here; treat that like an
    // empty pool.
    let (stored_system, stored_tools) = app
        .gateway
        .fingerprints(&client_id)
        .await
        .ok_or(ApiError::ServiceUnavailable)?;

    let outcome = rewrite_request(
        &request,
        &request_id,
        stored_system.as_deref(),
        stored_tools.as_deref(),
        rfc3339_now(),
    );
    let outbound = ClientBoundFrame::CompletionRequest(outcome.frame.clone());
    let outbound_json = serde_json::to_string(&outbound)
        .map_err(|e| ApiError::Internal(format!("failed to encode outbound frame: {e}")))?;
    if let Some(sink) = &app.gateway.debug_logs
        && let Ok(value) = serde_json::to_value(&outbound)
    {
        sink.capture(&request_id, "forward", &value);
    }

    // Ordering contract: waiter registration and the busy transition both
    // precede the socket write.
    let waiter = app
        .gateway
        .correlator
        .register(&request_id, &client_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    app.gateway.mark_busy(&client_id, &request_id).await;

    if !app.gateway.send_to(&client_id, &outbound_json).await {
        app.gateway
            .correlator
            .fail(&request_id, ReplyError::SendFailed)
            .await;
        drop(waiter);
        app.gateway.mark_dead(&client_id).await;
        app.gateway.detach(&client_id, "send_failed").await;
        return Err(ApiError::Internal(
            "failed to forward request to client".into(),
        ));
    }

    // Fingerprints reflect only payloads that actually went out.
    app.gateway
        .store_fingerprints(
            &client_id,
            outcome.system_to_store(),
            outcome.tools_to_store(),
        )
        .await;

    let reply = app
        .gateway
        .correlator
        .await_reply(waiter, app.gateway.timeouts.request_timeout())
        .await;
    let frame = match reply {
        Ok(frame) => frame,
        Err(ReplyError::Timeout) => {
            warn!(request_id = %request_id, client_id = %client_id, "completion timed out");
            // Return the session to the pool if it still carries this
            // request; a late reply will be dropped by the correlator.
            app.gateway.release(&client_id, &request_id).await;
            return Err(ApiError::Timeout);
        },
        Err(ReplyError::ClientGone) => {
            return Err(ApiError::Internal(
                "client disconnected before replying".into(),
            ));
        },
        Err(ReplyError::SendFailed) => {
            return Err(ApiError::Internal(
                "failed to forward request to client".into(),
            ));
        },
    };

    if let Some(sink) = &app.gateway.debug_logs
        && let Ok(value) = serde_json::to_value(&frame)
    {
        sink.capture(&request_id, "response", &value);
    }

    if let Some(client_error) = &frame.error {
        return Err(ApiError::Client {
            message: client_error
                .message
                .clone()
                .unwrap_or_else(|| "client failed to process the request".into()),
            kind: client_error
                .r#type
                .clone()
                .unwrap_or_else(|| "client_error".into()),
        });
    }

    let decoded = decode_reply(&frame);
    if decoded.content.is_empty() {
        return Err(ApiError::EmptyResponse);
    }

    let prompt_text = request
        .messages
        .iter()
        .map(|m| m.content.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ");
    let usage = Usage {
        prompt_tokens: estimate_tokens(&prompt_text),
        completion_tokens: estimate_tokens(&decoded.content),
        total_tokens: estimate_tokens(&prompt_text) + estimate_tokens(&decoded.content),
    };

    let completion_id = format!("chatcmpl-{request_id}");
    let created = unix_now();
    info!(
        request_id = %request_id,
        content_chars = decoded.content.chars().count(),
        tool_calls = decoded.tool_calls.is_some(),
        "completion finished"
    );

    if request.stream {
        return Ok(stream_response(&completion_id, created, &request.model, &decoded));
    }

    let finish_reason = finish_reason(&decoded, frame.finish_reason.as_deref());
    let response = ChatCompletionResponse {
        id: completion_id,
        object: "chat.completion".into(),
        created,
        model: request.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".into(),
                content: Some(decoded.content),
                tool_calls: decoded.tool_calls,
            },
            finish_reason,
        }],
        usage,
    };
    Ok(Json(response).into_response())
}

fn finish_reason(decoded: &DecodedReply, from_frame: Option<&str>) -> String {
    if decoded.tool_calls.is_some() {
        "tool_calls".into()
    } else {
        from_frame.unwrap_or("stop").to_string()
    }
}

fn new_request_id() -> String {
    format!(
        "{REQUEST_ID_PREFIX}{}",
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// `max(1, chars / 4)` for non-empty text; the gateway has no tokenizer.
fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    ((chars / 4).max(1)) as u32
}

// ── SSE synthesis ────────────────────────────────────────────────────────────

fn stream_response(
    completion_id: &str,
    created: i64,
    model: &str,
    decoded: &DecodedReply,
) -> Response {
    let chunks = stream_chunks(completion_id, created, model, decoded);
    let mut events: Vec<Event> = Vec::with_capacity(chunks.len() + 1);
    for chunk in &chunks {
        match Event::default().json_data(chunk) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "failed to encode SSE chunk"),
        }
    }
    events.push(Event::default().data("[DONE]"));

    let stream = futures::stream::iter(events.into_iter().map(Ok::<_, Infallible>));
    Sse::new(stream).into_response()
}

/// The full chunk sequence for one synthesized stream: a role delta, the
/// content re-cut into fixed-size pieces, a stop terminal, and — when the
/// reply carried tool calls — a tool-call delta with its own terminal.
fn stream_chunks(
    completion_id: &str,
    created: i64,
    model: &str,
    decoded: &DecodedReply,
) -> Vec<ChatCompletionChunk> {
    let chunk = |delta: ChunkDelta, finish: Option<&str>| {
        ChatCompletionChunk::new(completion_id, created, model, ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish.map(str::to_string),
        })
    };

    let mut chunks = vec![chunk(
        ChunkDelta {
            role: Some("assistant".into()),
            ..ChunkDelta::default()
        },
        None,
    )];

    let characters: Vec<char> = decoded.content.chars().collect();
    for piece in characters.chunks(SSE_CONTENT_CHUNK_CHARS) {
        chunks.push(chunk(
            ChunkDelta {
                content: Some(piece.iter().collect()),
                ..ChunkDelta::default()
            },
            None,
        ));
    }

    chunks.push(chunk(ChunkDelta::default(), Some("stop")));

    if let Some(tool_calls) = &decoded.tool_calls {
        chunks.push(chunk(
            ChunkDelta {
                tool_calls: Some(tool_calls.clone()),
                ..ChunkDelta::default()
            },
            None,
        ));
        chunks.push(chunk(ChunkDelta::default(), Some("tool_calls")));
    }

    chunks
}
