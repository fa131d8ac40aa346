//! Liveness loop.
//!
//! Every `heartbeat_interval` the sweep sends a heartbeat frame to each
//! session and reaps the ones whose `last_seen` has crossed
//! `connection_timeout` (or whose socket refuses the write). Detaching a
//! session fails its pending requests with a client-gone error.

use std::{sync::Arc, time::Instant};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {switchboard_common::time::rfc3339_now, switchboard_protocol::ClientBoundFrame};

use crate::state::GatewayState;

/// Spawn the heartbeat loop. The returned handle completes after `shutdown`
/// is cancelled; join it before tearing the process down.
pub fn spawn(state: Arc<GatewayState>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.timeouts.heartbeat_interval());
        interval.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("heartbeat loop stopping");
                    break;
                },
                _ = interval.tick() => sweep(&state).await,
            }
        }
    })
}

/// One probe-and-reap pass over every session.
pub async fn sweep(state: &GatewayState) {
    let timeout = state.timeouts.connection_timeout();
    let now = Instant::now();

    // Senders are cloned under the lock; the writes happen after release so
    // one slow socket cannot stall the rest of the pool.
    let targets: Vec<(String, tokio::sync::mpsc::UnboundedSender<String>, bool)> = {
        let sessions = state.sessions().read().await;
        sessions
            .values()
            .map(|s| (s.id.clone(), s.sender.clone(), s.is_stale(timeout, now)))
            .collect()
    };

    let probe = match serde_json::to_string(&ClientBoundFrame::heartbeat(rfc3339_now())) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize heartbeat frame");
            return;
        },
    };

    for (id, sender, stale) in targets {
        if stale {
            state.detach(&id, "heartbeat_timeout").await;
            continue;
        }
        if sender.send(probe.clone()).is_err() {
            warn!(client_id = %id, "heartbeat send failed");
            state.mark_dead(&id).await;
            state.detach(&id, "heartbeat_send_failed").await;
        }
    }
}
