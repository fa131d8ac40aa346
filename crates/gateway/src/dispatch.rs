//! Idle-client selection.
//!
//! Among healthy Idle sessions the dispatcher picks the one seen most
//! recently: a fresh `last_seen` means a live socket, and warm clients keep
//! their fingerprint caches, so reusing them elides re-sending bulky system
//! prompts. Ties on `last_seen` fall to the lexicographically smallest id.

use std::time::Instant;

use tracing::info;

use crate::state::{GatewayState, SessionState};

impl GatewayState {
    /// Choose an idle session for a new request, or None when every client
    /// is busy, stale, or gone. Stale Idle sessions found while scanning are
    /// evicted as a side effect.
    pub async fn pick_client(&self) -> Option<String> {
        let timeout = self.timeouts.connection_timeout();
        let now = Instant::now();

        let (best, evicted) = {
            let mut sessions = self.sessions().write().await;

            let stale: Vec<String> = sessions
                .values()
                .filter(|s| s.state == SessionState::Idle && s.is_stale(timeout, now))
                .map(|s| s.id.clone())
                .collect();
            for id in &stale {
                sessions.remove(id);
            }

            let mut best: Option<(Instant, String)> = None;
            for session in sessions.values() {
                if session.state != SessionState::Idle {
                    continue;
                }
                let candidate = (session.last_seen, session.id.clone());
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        if candidate.0 > current.0
                            || (candidate.0 == current.0 && candidate.1 < current.1)
                        {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    },
                };
            }
            (best.map(|(_, id)| id), stale)
        };

        // Idle sessions own no pending requests, so eviction is pure
        // bookkeeping; log it outside the lock.
        for id in evicted {
            info!(client_id = %id, "evicted stale idle session");
        }

        best
    }
}
