//! In-flight request correlation.
//!
//! Each forwarded completion registers a one-shot waiter keyed by request id
//! **before** its frame is written to the socket, so a reply can never race
//! the registration. Resolution is single-shot: whichever of reply, timeout,
//! or client-gone arrives first consumes the entry; later attempts find
//! nothing and are logged and dropped.

use std::{collections::HashMap, time::Instant};

use {
    thiserror::Error,
    tokio::sync::{RwLock, oneshot},
    tracing::{debug, warn},
};

use switchboard_protocol::CompletionResponseFrame;

/// Why a forwarded request completed without a usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("client did not reply before the deadline")]
    Timeout,
    #[error("client disconnected before replying")]
    ClientGone,
    #[error("failed to write the request frame to the client socket")]
    SendFailed,
}

type ReplyResult = Result<CompletionResponseFrame, ReplyError>;

/// Receiving half of one pending request. Consumed by
/// [`Correlator::await_reply`].
pub struct ReplyWaiter {
    request_id: String,
    rx: oneshot::Receiver<ReplyResult>,
}

struct Pending {
    client_id: String,
    tx: oneshot::Sender<ReplyResult>,
    registered_at: Instant,
}

#[derive(Debug, Error)]
#[error("request id {0} is already registered")]
pub struct DuplicateRequestId(pub String);

/// Maps in-flight request ids to their waiters.
///
/// The pending map has its own lock, narrower in scope than the registry
/// lock, and the two are never held together.
pub struct Correlator {
    pending: RwLock<HashMap<String, Pending>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a waiter for `request_id` owned by `client_id`. Must happen
    /// before the request frame is written.
    pub async fn register(
        &self,
        request_id: &str,
        client_id: &str,
    ) -> Result<ReplyWaiter, DuplicateRequestId> {
        let mut pending = self.pending.write().await;
        if pending.contains_key(request_id) {
            return Err(DuplicateRequestId(request_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id.to_string(), Pending {
            client_id: client_id.to_string(),
            tx,
            registered_at: Instant::now(),
        });
        Ok(ReplyWaiter {
            request_id: request_id.to_string(),
            rx,
        })
    }

    /// Deliver a client reply. Returns the owning client id, or None when
    /// the entry is already gone (late reply — logged and dropped).
    pub async fn resolve(
        &self,
        request_id: &str,
        frame: CompletionResponseFrame,
    ) -> Option<String> {
        let removed = self.pending.write().await.remove(request_id);
        match removed {
            Some(entry) => {
                debug!(
                    request_id,
                    elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
                    "reply correlated"
                );
                let _ = entry.tx.send(Ok(frame));
                Some(entry.client_id)
            },
            None => {
                warn!(request_id, "dropping reply for unknown or resolved request");
                None
            },
        }
    }

    /// Resolve with an error instead of a reply. Same single-shot semantics
    /// as [`Self::resolve`].
    pub async fn fail(&self, request_id: &str, error: ReplyError) -> Option<String> {
        let removed = self.pending.write().await.remove(request_id);
        match removed {
            Some(entry) => {
                let _ = entry.tx.send(Err(error));
                Some(entry.client_id)
            },
            None => None,
        }
    }

    /// Fail every pending request owned by `client_id` with a client-gone
    /// error. Returns how many were failed.
    pub async fn fail_owned(&self, client_id: &str) -> usize {
        let orphaned: Vec<Pending> = {
            let mut pending = self.pending.write().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.client_id == client_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = orphaned.len();
        for entry in orphaned {
            let _ = entry.tx.send(Err(ReplyError::ClientGone));
        }
        count
    }

    /// Block until the waiter is signalled or `timeout` elapses. A timeout
    /// removes the pending entry so a late reply finds nothing.
    pub async fn await_reply(
        &self,
        waiter: ReplyWaiter,
        timeout: std::time::Duration,
    ) -> ReplyResult {
        match tokio::time::timeout(timeout, waiter.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without resolution: the owning entry was
            // discarded wholesale, which only happens on disconnect paths.
            Ok(Err(_)) => Err(ReplyError::ClientGone),
            Err(_) => {
                self.pending.write().await.remove(&waiter.request_id);
                Err(ReplyError::Timeout)
            },
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// The owning client of a pending request, if still registered.
    pub async fn owner_of(&self, request_id: &str) -> Option<String> {
        self.pending
            .read()
            .await
            .get(request_id)
            .map(|p| p.client_id.clone())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn reply(request_id: &str, content: &str) -> CompletionResponseFrame {
        CompletionResponseFrame {
            request_id: request_id.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            finish_reason: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn resolve_delivers_to_registered_waiter() {
        let correlator = Correlator::new();
        let waiter = correlator.register("req_11111111", "client_a").await.unwrap();

        let owner = correlator
            .resolve("req_11111111", reply("req_11111111", "hello"))
            .await;
        assert_eq!(owner.as_deref(), Some("client_a"));

        let result = correlator
            .await_reply(waiter, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("hello"));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let correlator = Correlator::new();
        let _waiter = correlator.register("req_22222222", "client_a").await.unwrap();
        assert!(correlator.register("req_22222222", "client_b").await.is_err());
    }

    #[tokio::test]
    async fn late_reply_is_dropped() {
        let correlator = Correlator::new();
        assert!(
            correlator
                .resolve("req_33333333", reply("req_33333333", "late"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn timeout_removes_the_entry() {
        let correlator = Correlator::new();
        let waiter = correlator.register("req_44444444", "client_a").await.unwrap();

        let result = correlator
            .await_reply(waiter, Duration::from_millis(20))
            .await;
        assert_eq!(result.unwrap_err(), ReplyError::Timeout);
        assert_eq!(correlator.pending_count().await, 0);

        // The reply arriving after the timeout finds nothing.
        assert!(
            correlator
                .resolve("req_44444444", reply("req_44444444", "too late"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn resolution_is_single_shot() {
        let correlator = Correlator::new();
        let waiter = correlator.register("req_55555555", "client_a").await.unwrap();

        assert!(
            correlator
                .resolve("req_55555555", reply("req_55555555", "first"))
                .await
                .is_some()
        );
        // Second resolution and a failure attempt are both no-ops.
        assert!(
            correlator
                .resolve("req_55555555", reply("req_55555555", "second"))
                .await
                .is_none()
        );
        assert!(
            correlator
                .fail("req_55555555", ReplyError::ClientGone)
                .await
                .is_none()
        );

        let result = correlator
            .await_reply(waiter, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn fail_owned_only_touches_that_client() {
        let correlator = Correlator::new();
        let waiter_a = correlator.register("req_aaaa1111", "client_a").await.unwrap();
        let waiter_b = correlator.register("req_bbbb1111", "client_b").await.unwrap();

        assert_eq!(correlator.fail_owned("client_a").await, 1);
        assert_eq!(correlator.pending_count().await, 1);

        let gone = correlator
            .await_reply(waiter_a, Duration::from_secs(1))
            .await;
        assert_eq!(gone.unwrap_err(), ReplyError::ClientGone);

        correlator
            .resolve("req_bbbb1111", reply("req_bbbb1111", "survives"))
            .await
            .unwrap();
        let ok = correlator
            .await_reply(waiter_b, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok.content.as_deref(), Some("survives"));
    }

    #[tokio::test]
    async fn owner_of_reports_registration() {
        let correlator = Correlator::new();
        let _waiter = correlator.register("req_cccc1111", "client_c").await.unwrap();
        assert_eq!(
            correlator.owner_of("req_cccc1111").await.as_deref(),
            Some("client_c")
        );
        assert!(correlator.owner_of("req_other000").await.is_none());
    }
}
