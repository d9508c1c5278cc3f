//! Correlates outbound bus requests with inbound OK/EOSE responses (§4.4).
//!
//! Keyed by either an event id (for OK) or a subscription id (for EOSE).
//! Each key has at most one pending waiter; a late or unknown-key resolve
//! is a harmless no-op, matching a request that already timed out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// What a tracked request was waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerResponse {
    /// An `OK` frame: the relay's verdict on a published event.
    Ok {
        /// Whether the relay accepted the event.
        accepted: bool,
        /// Human-readable relay message, often empty.
        message: String,
    },
    /// An `EOSE` frame: the relay has sent all stored events for a subscription.
    Eose,
}

/// Why `await_response` did not return a [`TrackerResponse`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    /// The timeout elapsed before `resolve` was called.
    #[error("timed out waiting for a response")]
    Timeout,
    /// `cancel_all` ran before a response arrived (shutdown).
    #[error("request was cancelled")]
    Cancelled,
}

/// Pending-request registry shared by the orchestrator and its spawned
/// correlation tasks.
#[derive(Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, oneshot::Sender<TrackerResponse>>>,
}

impl RequestTracker {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry for `key` and suspend until `resolve` is
    /// called with it, or `timeout` elapses.
    pub async fn await_response(&self, key: &str, timeout: Duration) -> Result<TrackerResponse, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("request tracker lock poisoned").insert(key.to_string(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TrackerError::Cancelled),
            Err(_) => {
                self.pending.lock().expect("request tracker lock poisoned").remove(key);
                Err(TrackerError::Timeout)
            }
        }
    }

    /// Complete the pending entry for `key` with `response`, if one exists.
    /// A no-op for an unknown key (the request may have already timed out).
    pub fn resolve(&self, key: &str, response: TrackerResponse) {
        if let Some(tx) = self.pending.lock().expect("request tracker lock poisoned").remove(key) {
            let _ = tx.send(response);
        }
    }

    /// Drop every pending entry, waking each waiter with `Cancelled`.
    /// Called during shutdown.
    pub fn cancel_all(&self) {
        self.pending.lock().expect("request tracker lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_completes_matching_waiter() {
        let tracker = Arc::new(RequestTracker::new());
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.await_response("event-1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        tracker.resolve("event-1", TrackerResponse::Ok { accepted: true, message: String::new() });

        let result = waiter.await.unwrap();
        assert_eq!(result, Ok(TrackerResponse::Ok { accepted: true, message: String::new() }));
    }

    #[tokio::test]
    async fn test_resolve_unknown_key_is_noop() {
        let tracker = RequestTracker::new();
        tracker.resolve("nope", TrackerResponse::Eose);
    }

    #[tokio::test]
    async fn test_timeout_elapses_and_removes_entry() {
        let tracker = RequestTracker::new();
        let result = tracker.await_response("sub-1", Duration::from_millis(10)).await;
        assert_eq!(result, Err(TrackerError::Timeout));

        // A late resolve after the timeout must be a harmless no-op.
        tracker.resolve("sub-1", TrackerResponse::Eose);
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_every_waiter() {
        let tracker = Arc::new(RequestTracker::new());
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.await_response("event-1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        tracker.cancel_all();

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(TrackerError::Cancelled));
    }
}
