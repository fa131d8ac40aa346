//! WebSocket client lifecycle: accept → attach → frame loop → detach.
//!
//! Each connection gets a dedicated write loop fed by an unbounded channel
//! (one writer per socket) and a reader that classifies inbound frames and
//! routes them to the registry, the correlator, or the debug sink. Malformed
//! or unknown frames get an error reply on the same socket and never kill
//! the session; a read error or EOF does.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        extract::{
            ConnectInfo, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::IntoResponse,
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    switchboard_common::time::rfc3339_now,
    switchboard_protocol::{ClientBoundFrame, SERVER_BOUND_TYPES, ServerBoundFrame},
};

use crate::{server::AppState, state::GatewayState};

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, app.gateway, addr))
}

/// Drive one client connection through its full lifecycle.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: the only task that touches the sink half.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let client_id = state.attach(client_tx.clone()).await;
    info!(client_id = %client_id, remote = %remote, "ws: client connected");

    let welcome = ClientBoundFrame::connection_established(client_id.clone(), rfc3339_now());
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = client_tx.send(json);
    }

    // ── Frame loop ───────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "ws: read error");
                break;
            },
        };
        handle_frame(&state, &client_id, &client_tx, &text).await;
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    let connected = state.detach(&client_id, "disconnect").await;
    info!(
        client_id = %client_id,
        connected_secs = connected.map(|d| d.as_secs()).unwrap_or_default(),
        "ws: client disconnected"
    );
    drop(client_tx);
    write_handle.abort();
}

/// Classify one inbound text frame and act on it.
async fn handle_frame(
    state: &GatewayState,
    client_id: &str,
    reply_tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, error = %e, "ws: invalid JSON frame");
            send_error(reply_tx, "invalid JSON format");
            return;
        },
    };

    let frame_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let frame: ServerBoundFrame = match serde_json::from_value(value) {
        Ok(f) => f,
        Err(e) => {
            if SERVER_BOUND_TYPES.contains(&frame_type.as_str()) {
                warn!(client_id, frame_type, error = %e, "ws: malformed frame");
                send_error(reply_tx, &format!("malformed {frame_type} frame"));
            } else {
                warn!(client_id, frame_type, "ws: unknown frame type");
                send_error(reply_tx, &format!("unknown type: {frame_type}"));
            }
            return;
        },
    };

    // Any well-formed frame proves the socket is alive.
    state.touch(client_id).await;

    match frame {
        ServerBoundFrame::HeartbeatResponse { .. } => {},
        ServerBoundFrame::Register { client_version } => {
            info!(client_id, client_version = client_version.as_deref().unwrap_or("unknown"), "ws: client registered");
        },
        ServerBoundFrame::ClientReady {} => {
            state.mark_ready(client_id).await;
            debug!(client_id, "ws: client ready");
        },
        ServerBoundFrame::CompletionResponse(reply) => {
            let request_id = reply.request_id.clone();
            match state.correlator.resolve(&request_id, reply).await {
                Some(owner) => {
                    // Resolution precedes the idle transition; a session
                    // already claimed by a newer request is left alone.
                    state.release(&owner, &request_id).await;
                    info!(client_id, request_id = %request_id, "ws: reply delivered");
                },
                None => {
                    debug!(client_id, request_id = %request_id, "ws: late reply dropped");
                },
            }
        },
        ServerBoundFrame::ClientLog(entry) => {
            if let Some(sink) = &state.debug_logs {
                sink.save_client_log(client_id, &entry);
            }
        },
    }
}

fn send_error(reply_tx: &mpsc::UnboundedSender<String>, message: &str) {
    let frame = ClientBoundFrame::error(message, rfc3339_now());
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = reply_tx.send(json);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use switchboard_config::TimeoutsConfig;

    use super::*;

    async fn attached_state() -> (
        Arc<GatewayState>,
        String,
        mpsc::UnboundedReceiver<String>,
    ) {
        let state = GatewayState::new(TimeoutsConfig::default(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.attach(tx).await;
        (state, id, rx)
    }

    fn parse(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn invalid_json_earns_an_error_reply() {
        let (state, id, mut rx) = attached_state().await;
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        handle_frame(&state, &id, &reply_tx, "{not json").await;

        let reply = parse(&reply_rx.recv().await.unwrap());
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "invalid JSON format");
        // The session is still attached.
        assert_eq!(state.client_count().await, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_type_is_reported_on_socket() {
        let (state, id, _rx) = attached_state().await;
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        handle_frame(&state, &id, &reply_tx, r#"{"type": "telemetry"}"#).await;

        let reply = parse(&reply_rx.recv().await.unwrap());
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "unknown type: telemetry");
    }

    #[tokio::test]
    async fn malformed_known_frame_is_distinguished_from_unknown() {
        let (state, id, _rx) = attached_state().await;
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        // completion_response without its required request_id.
        handle_frame(
            &state,
            &id,
            &reply_tx,
            r#"{"type": "completion_response", "content": "x"}"#,
        )
        .await;

        let reply = parse(&reply_rx.recv().await.unwrap());
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "malformed completion_response frame");
    }

    #[tokio::test]
    async fn completion_response_resolves_and_idles_the_session() {
        let (state, id, _rx) = attached_state().await;
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();

        let waiter = state.correlator.register("req_e2e00001", &id).await.unwrap();
        state.mark_busy(&id, "req_e2e00001").await;

        handle_frame(
            &state,
            &id,
            &reply_tx,
            r#"{"type": "completion_response", "request_id": "req_e2e00001",
                "content": "<content>done</content><response_done>"}"#,
        )
        .await;

        let frame = state
            .correlator
            .await_reply(waiter, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            frame.content.as_deref(),
            Some("<content>done</content><response_done>")
        );

        let sessions = state.sessions().read().await;
        assert_eq!(
            sessions.get(&id).unwrap().state,
            crate::state::SessionState::Idle
        );
    }

    #[tokio::test]
    async fn client_ready_while_busy_does_not_free_the_session() {
        let (state, id, _rx) = attached_state().await;
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        state.mark_busy(&id, "req_pending1").await;

        handle_frame(&state, &id, &reply_tx, r#"{"type": "client_ready"}"#).await;

        let sessions = state.sessions().read().await;
        assert_eq!(
            sessions.get(&id).unwrap().state,
            crate::state::SessionState::Busy
        );
    }

    #[tokio::test]
    async fn frames_refresh_last_seen() {
        let (state, id, _rx) = attached_state().await;
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();

        let before = {
            let sessions = state.sessions().read().await;
            sessions.get(&id).unwrap().last_seen
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        handle_frame(&state, &id, &reply_tx, r#"{"type": "heartbeat_response"}"#).await;

        let after = {
            let sessions = state.sessions().read().await;
            sessions.get(&id).unwrap().last_seen
        };
        assert!(after > before);
    }
}
