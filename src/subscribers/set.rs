//! # Panic-isolated event fan-out.
//!
//! [`SubscriberSet`] delivers each event to every subscriber in turn,
//! catching panics per subscriber so one broken observer cannot corrupt
//! scheduler state or starve its peers. Panics are reported back onto the bus
//! as [`EventKind::ObserverPanicked`].

use std::sync::Arc;

use futures::FutureExt;

use crate::events::{Bus, Event, EventKind};

use super::subscriber::Subscribe;

/// Fan-out set over the configured subscribers.
pub struct SubscriberSet {
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus: Bus,
}

impl SubscriberSet {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        Self { subscribers, bus }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers one event to every subscriber, isolating panics.
    pub async fn emit(&self, event: &Event) {
        for subscriber in &self.subscribers {
            let delivery = std::panic::AssertUnwindSafe(subscriber.on_event(event));
            if let Err(panic) = delivery.catch_unwind().await {
                let info = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                log::error!("subscriber '{}' panicked: {info}", subscriber.name());
                // Don't report panics caused by handling a panic report.
                if event.kind != EventKind::ObserverPanicked {
                    self.bus.publish(
                        Event::new(EventKind::ObserverPanicked)
                            .with_reason(format!("{}: {info}", subscriber.name())),
                    );
                }
            }
        }
    }
}
