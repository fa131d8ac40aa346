//! Client sessions and the registry that owns them.
//!
//! Every mutable session field lives behind the single `sessions` lock.
//! Socket writes never happen under that lock: callers clone the session's
//! outbound sender (or use [`GatewayState::send_to`], which does) and write
//! after releasing it. The registry lock and the correlator's pending lock
//! are never held at the same time; flows that need both take them one
//! after the other.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, warn},
};

use {
    switchboard_common::time::rfc3339_now,
    switchboard_config::TimeoutsConfig,
    switchboard_protocol::CLIENT_ID_PREFIX,
};

use crate::{correlate::Correlator, logs::DebugLogStore};

// ── Client session ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Busy,
    Dead,
}

/// One attached browser client.
#[derive(Debug)]
pub struct ClientSession {
    pub id: String,
    /// Feeds this session's write loop; one writer per socket.
    pub sender: mpsc::UnboundedSender<String>,
    pub state: SessionState,
    /// Present iff `state` is Busy.
    pub current_request_id: Option<String>,
    pub last_seen: Instant,
    pub created_at: Instant,
    /// Digest of the last system-prompt bundle actually transmitted here.
    pub system_fingerprint: Option<String>,
    /// Digest of the last tool catalog actually transmitted here.
    pub tools_fingerprint: Option<String>,
}

impl ClientSession {
    fn new(id: String, sender: mpsc::UnboundedSender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            sender,
            state: SessionState::Idle,
            current_request_id: None,
            last_seen: now,
            created_at: now,
            system_fingerprint: None,
            tools_fingerprint: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_stale(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_seen) > timeout
    }
}

// ── Aggregate stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub busy_connections: usize,
    pub pending_requests: usize,
    pub timestamp: String,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Process-scoped registry + correlator pair, wrapped in Arc for use across
/// async tasks. Constructed once at startup and injected into handlers.
pub struct GatewayState {
    sessions: RwLock<HashMap<String, ClientSession>>,
    pub correlator: Correlator,
    pub timeouts: TimeoutsConfig,
    /// Debug sink for client logs and per-request captures; None when disabled.
    pub debug_logs: Option<DebugLogStore>,
}

impl GatewayState {
    pub fn new(timeouts: TimeoutsConfig, debug_logs: Option<DebugLogStore>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            correlator: Correlator::new(),
            timeouts,
            debug_logs,
        })
    }

    /// Register a freshly accepted socket. The session starts Idle.
    pub async fn attach(&self, sender: mpsc::UnboundedSender<String>) -> String {
        let id = format!(
            "{CLIENT_ID_PREFIX}{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let session = ClientSession::new(id.clone(), sender);
        self.sessions.write().await.insert(id.clone(), session);
        info!(client_id = %id, "client attached");
        id
    }

    /// Remove a session and fail every pending request it owns with a
    /// client-gone error. Idempotent; returns the session's connected time.
    pub async fn detach(&self, id: &str, reason: &str) -> Option<Duration> {
        let removed = self.sessions.write().await.remove(id);
        let session = removed?;
        // Lock released; now resolve the orphaned requests.
        let failed = self.correlator.fail_owned(id).await;
        info!(
            client_id = %id,
            reason,
            orphaned_requests = failed,
            "client detached"
        );
        Some(session.created_at.elapsed())
    }

    /// Detach every session (shutdown path).
    pub async fn detach_all(&self, reason: &str) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.detach(&id, reason).await;
        }
    }

    /// Idle → Busy with the in-flight request id. Returns false if the
    /// session is gone.
    pub async fn mark_busy(&self, id: &str, request_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.state = SessionState::Busy;
                session.current_request_id = Some(request_id.to_string());
                true
            },
            None => false,
        }
    }

    /// Busy → Idle, but only while the session still references
    /// `request_id`. A session already claimed by a newer request is left
    /// alone. Idempotent.
    pub async fn release(&self, id: &str, request_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.current_request_id.as_deref() != Some(request_id) {
            return false;
        }
        session.state = SessionState::Idle;
        session.current_request_id = None;
        true
    }

    /// `client_ready` handling: back to Idle unless a request is in flight.
    /// A ready signal racing an outstanding reply must not free the session
    /// for a second dispatch.
    pub async fn mark_ready(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        match session.state {
            SessionState::Busy => {
                debug!(client_id = %id, "ignoring client_ready while busy");
            },
            _ => {
                session.state = SessionState::Idle;
                session.current_request_id = None;
            },
        }
    }

    /// Mark a session dead after a failed write. The next heartbeat sweep
    /// (or the reader's EOF) detaches it.
    pub async fn mark_dead(&self, id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.state = SessionState::Dead;
            warn!(client_id = %id, "session marked dead");
        }
    }

    /// Refresh liveness after any inbound frame.
    pub async fn touch(&self, id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.touch();
        }
    }

    /// The fingerprints last transmitted on this session, or None if the
    /// session is gone.
    pub async fn fingerprints(&self, id: &str) -> Option<(Option<String>, Option<String>)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        Some((
            session.system_fingerprint.clone(),
            session.tools_fingerprint.clone(),
        ))
    }

    /// Store fingerprints for payloads that were actually transmitted.
    /// `None` means the corresponding payload was not sent and the stored
    /// value must stay untouched.
    pub async fn store_fingerprints(
        &self,
        id: &str,
        system: Option<String>,
        tools: Option<String>,
    ) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if let Some(fp) = system {
            session.system_fingerprint = Some(fp);
        }
        if let Some(fp) = tools {
            session.tools_fingerprint = Some(fp);
        }
    }

    /// Queue a frame for one session. The sender is cloned under the lock and
    /// the write happens after it is released.
    pub async fn send_to(&self, id: &str, frame: &str) -> bool {
        let sender = {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(session) => session.sender.clone(),
                None => return false,
            }
        };
        sender.send(frame.to_string()).is_ok()
    }

    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Aggregate connection stats for `/`, `/health`, and `/stats`.
    pub async fn snapshot(&self) -> Snapshot {
        let (total, idle, busy) = {
            let sessions = self.sessions.read().await;
            let idle = sessions
                .values()
                .filter(|s| s.state == SessionState::Idle)
                .count();
            let busy = sessions
                .values()
                .filter(|s| s.state == SessionState::Busy)
                .count();
            (sessions.len(), idle, busy)
        };
        Snapshot {
            total_connections: total,
            idle_connections: idle,
            busy_connections: busy,
            pending_requests: self.correlator.pending_count().await,
            timestamp: rfc3339_now(),
        }
    }

    /// Access the session map for scanning. Used by the dispatcher and the
    /// heartbeat sweep, which need more than single-session lookups.
    pub(crate) fn sessions(&self) -> &RwLock<HashMap<String, ClientSession>> {
        &self.sessions
    }
}
