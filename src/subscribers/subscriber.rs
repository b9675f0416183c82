//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for plugging custom event handlers
//! into the runtime: metrics, logging, application callbacks.
//!
//! ## Rules
//! - Delivery is fire-and-forget from a dedicated listener task; a subscriber
//!   never blocks the scheduler.
//! - A panicking subscriber is isolated: the panic is caught, reported as
//!   [`EventKind::ObserverPanicked`](crate::events::EventKind::ObserverPanicked),
//!   and delivery to the other subscribers continues.
//! - Events arrive in bus order per subscriber.

use async_trait::async_trait;

use crate::events::Event;

/// Observer of runtime events.
///
/// ## Example
/// ```rust
/// use async_trait::async_trait;
/// use linkvisor::{Event, EventKind, Subscribe};
///
/// struct ConnectCounter;
///
/// #[async_trait]
/// impl Subscribe for ConnectCounter {
///     async fn on_event(&self, ev: &Event) {
///         if matches!(ev.kind, EventKind::ConnectFailed) {
///             // export a metric, etc.
///         }
///     }
///
///     fn name(&self) -> &'static str { "connect-counter" }
/// }
/// ```
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Short, stable subscriber name for diagnostics.
    fn name(&self) -> &'static str;
}
