use dashmap::DashMap;
use mailflow_core::event::{Event, EventKind};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

/// Per-user typed event fan-out.
///
/// One broadcast channel per user id; emission is fire-and-forget and never
/// blocks a worker task. A lagged or dropped subscriber only affects
/// itself.
pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's event stream, creating the channel on first use.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Event> {
        self.channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emit an event to every subscriber of `user_id`. No subscribers is
    /// not an error.
    pub fn emit(&self, user_id: &str, kind: EventKind, data: serde_json::Value) {
        trace!(user_id, event = %kind, "emit");
        if let Some(tx) = self.channels.get(user_id) {
            let _ = tx.send(Event::new(kind, data));
        }
    }

    /// Subscriber count, for diagnostics.
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.channels
            .get(user_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("u1");
        let mut rx2 = bus.subscribe("u1");
        bus.emit("u1", EventKind::NewEmails, serde_json::json!({"count": 2}));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event, EventKind::NewEmails);
        assert_eq!(e2.data["count"], 2);
    }

    #[tokio::test]
    async fn events_are_per_user() {
        let bus = EventBus::new();
        let mut rx_other = bus.subscribe("u2");
        bus.subscribe("u1");
        bus.emit("u1", EventKind::NewEmails, serde_json::json!({}));
        assert!(matches!(
            rx_other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit("ghost", EventKind::SummarySaved, serde_json::json!({}));
        assert_eq!(bus.subscriber_count("ghost"), 0);
    }
}
