//! Live event fan-out, `spec.md` §4.2.
//!
//! Built on `tokio::sync::broadcast`, the same primitive the teacher uses
//! in `watcher.rs`'s `DualWatcher` to merge LSP and filesystem streams.
//! Overflow policy: a lagging subscriber's receiver returns
//! `RecvError::Lagged` rather than blocking the publisher; the HTTP SSE
//! layer turns that into a forced disconnect so the client reconnects and
//! re-queries `GET /events` for whatever it missed, per the "dropped
//! (subscription closed)" option in §4.2.

use tokio::sync::broadcast;

use crate::models::Event;

const CHANNEL_CAPACITY: usize = 1024;

pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Registers a new subscriber; drop the receiver to detach.
    pub fn attach(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Best-effort publish: no error if there are currently no subscribers.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, EventPayload};
    use chrono::Utc;

    fn sample_event(id: i64) -> Event {
        Event {
            id,
            project_id: None,
            instant: Utc::now(),
            kind: EventKind::Summary,
            path: None,
            payload: EventPayload::Summary { content: "x".into() },
        }
    }

    #[tokio::test]
    async fn published_events_reach_attached_subscriber() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.attach();
        broadcaster.publish(sample_event(1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(sample_event(1));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_error() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.attach();
        for i in 0..(CHANNEL_CAPACITY as i64 + 10) {
            broadcaster.publish(sample_event(i));
        }
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, tokio::sync::broadcast::error::RecvError::Lagged(_)));
    }
}
