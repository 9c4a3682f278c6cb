//! Per-session push queues.
//!
//! Background discovery finishes long after the synchronous response went
//! out; whatever it finds is queued here and drained by the transport layer
//! owning the session's long-lived connection. Many background tasks write,
//! exactly one transport reads, which is mpsc's shape.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::model::PushEvent;

struct SessionEntry {
    tx: UnboundedSender<PushEvent>,
}

/// Registry of active session queues with explicit lifecycle.
#[derive(Default)]
pub struct SessionChannels {
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session's queue and hand back its receiving end.
    ///
    /// Re-registering an id is not an error: the session gets a fresh queue
    /// and the previous receiver stops receiving.
    pub fn register(&self, session_id: &str) -> UnboundedReceiver<PushEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("session table poisoned");
        inner.insert(session_id.to_string(), SessionEntry { tx });
        rx
    }

    /// Enqueue an event for a session. Unknown or torn-down sessions are a
    /// silent no-op; producers never need to check first.
    pub fn push(&self, session_id: &str, event: PushEvent) -> bool {
        let inner = self.inner.lock().expect("session table poisoned");
        match inner.get(session_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => {
                debug!(session_id, "dropping push for inactive session");
                false
            }
        }
    }

    /// Tear the session down; subsequent pushes for it are dropped.
    pub fn unregister(&self, session_id: &str) {
        let mut inner = self.inner.lock().expect("session table poisoned");
        inner.remove(session_id);
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().expect("session table poisoned");
        inner.contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().expect("session table poisoned");
        inner.len()
    }
}

/// Transport-side drain helper: wait up to `wait` for the next queued event,
/// yielding a `Keepalive` when the queue stays idle so the connection is not
/// treated as stalled. Returns `None` once the channel is closed.
pub async fn next_or_keepalive(
    rx: &mut UnboundedReceiver<PushEvent>,
    wait: Duration,
) -> Option<PushEvent> {
    match tokio::time::timeout(wait, rx.recv()).await {
        Ok(event) => event,
        Err(_) => Some(PushEvent::Keepalive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn more(source: &str) -> PushEvent {
        PushEvent::MoreEvents {
            source: source.to_string(),
            events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn push_reaches_registered_session() {
        let channels = SessionChannels::new();
        let mut rx = channels.register("s1");

        assert!(channels.push("s1", more("deepwire")));
        match rx.recv().await {
            Some(PushEvent::MoreEvents { source, .. }) => assert_eq!(source, "deepwire"),
            other => panic!("unexpected push: {other:?}"),
        }
    }

    #[tokio::test]
    async fn push_to_unknown_session_is_a_noop() {
        let channels = SessionChannels::new();
        assert!(!channels.push("ghost", more("deepwire")));
    }

    #[tokio::test]
    async fn unregister_drops_further_pushes() {
        let channels = SessionChannels::new();
        let _rx = channels.register("s1");
        assert!(channels.is_active("s1"));

        channels.unregister("s1");
        assert!(!channels.is_active("s1"));
        assert!(!channels.push("s1", more("deepwire")));
    }

    #[tokio::test]
    async fn idle_queue_yields_keepalive() {
        let channels = SessionChannels::new();
        let mut rx = channels.register("s1");

        let event = next_or_keepalive(&mut rx, Duration::from_millis(20)).await;
        assert!(matches!(event, Some(PushEvent::Keepalive)));
    }
}
