//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (scheduler, trackers,
//! endpoint engines).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                   Subscribers (many):
//!   Scheduler  ──┐
//!   Trackers   ──┼──────► Bus ───────► subscriber_listener ────► SubscriberSet
//!   Fail mgr   ──┤  (broadcast chan)     (in LinkManager)
//!   Reconnect  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: a single ring buffer stores recent events for all
//!   receivers; slow receivers skip over missed items.
//! - **No persistence**: events are lost if there are no active subscribers at
//!   send time. Delivery is fire-and-forget by design.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender); multiple
/// publishers can publish concurrently and each receiver observes clones of
/// every event sent after it subscribed.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to ≥ 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers the event is dropped; the call still returns
    /// immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new independent receiver observing subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::StackTrouble).with_reason("probe"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::StackTrouble);
        assert_eq!(ev.reason.as_deref(), Some("probe"));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = Bus::new(1);
        bus.publish(Event::new(EventKind::StackTrouble));
    }
}
