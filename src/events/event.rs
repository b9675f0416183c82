//! # Runtime events emitted by the scheduler, trackers, and endpoint engines.
//!
//! The [`EventKind`] enum classifies event types:
//! - **Task events**: every task state transition.
//! - **State events**: observable endpoint/manager bitmask changes.
//! - **Connection events**: connect failures and reconnect attempts.
//! - **Diagnostics**: stack-health trouble and observer isolation reports.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore exact order when events are consumed
//! from independent receivers.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A task moved to a new state.
    ///
    /// Sets:
    /// - `task`: task kind label
    /// - `endpoint`: owning endpoint, if any
    /// - `task_state`: new state label
    /// - `status`: protocol status, when an ending state carries one
    TaskStateChanged,

    /// An endpoint or manager state mask changed in an externally observable
    /// way (the filtered diff was non-empty).
    ///
    /// Sets:
    /// - `endpoint`: owning endpoint (absent for the manager tracker)
    /// - `state_old` / `state_new` / `state_intent`: masks
    /// - `status`: protocol status accompanying the transition
    StateChanged,

    /// A connect attempt failed and the fail engine produced a decision.
    ///
    /// Sets:
    /// - `endpoint`, `attempt`, `status`
    /// - `reason`: failure classification label
    ConnectFailed,

    /// A reconnect session is triggering a new connect attempt.
    ///
    /// Sets:
    /// - `endpoint`, `attempt`
    /// - `delay_ms`: the delay that elapsed before this attempt
    /// - `reason`: session flavor (`"short-term"` / `"long-term"`)
    ReconnectAttempt,

    /// Stack-health diagnostic: something that should never happen did
    /// (connection task timed out, integrity violation, phantom link).
    ///
    /// Sets:
    /// - `reason`: what tripped
    /// - `endpoint`: if attributable
    StackTrouble,

    /// An observer panicked while handling an event. The observer is isolated;
    /// scheduler state is unaffected.
    ///
    /// Sets:
    /// - `reason`: panic info
    ObserverPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Owning endpoint id, if applicable.
    pub endpoint: Option<Arc<str>>,
    /// Task kind label, if applicable.
    pub task: Option<&'static str>,
    /// Task state label, for [`EventKind::TaskStateChanged`].
    pub task_state: Option<&'static str>,
    /// Previous state mask, for [`EventKind::StateChanged`].
    pub state_old: Option<u32>,
    /// New state mask, for [`EventKind::StateChanged`].
    pub state_new: Option<u32>,
    /// Intent mask (bits changed by explicit request), for
    /// [`EventKind::StateChanged`].
    pub state_intent: Option<u32>,
    /// Protocol status code, when one accompanies the event.
    pub status: Option<i32>,
    /// Attempt count (1-based), for connection events.
    pub attempt: Option<u32>,
    /// Delay in milliseconds, for [`EventKind::ReconnectAttempt`].
    pub delay_ms: Option<u32>,
    /// Human-readable reason or classification label.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next
    /// sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            endpoint: None,
            task: None,
            task_state: None,
            state_old: None,
            state_new: None,
            state_intent: None,
            status: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches an endpoint id.
    #[inline]
    pub fn with_endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attaches a task kind label.
    #[inline]
    pub fn with_task(mut self, task: &'static str) -> Self {
        self.task = Some(task);
        self
    }

    /// Attaches a task state label.
    #[inline]
    pub fn with_task_state(mut self, state: &'static str) -> Self {
        self.task_state = Some(state);
        self
    }

    /// Attaches a state mask transition.
    #[inline]
    pub fn with_masks(mut self, old: u32, new: u32, intent: u32) -> Self {
        self.state_old = Some(old);
        self.state_new = Some(new);
        self.state_intent = Some(intent);
        self
    }

    /// Attaches a protocol status code.
    #[inline]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::StackTrouble);
        let b = Event::new(EventKind::StackTrouble);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_builders_set_fields() {
        let ev = Event::new(EventKind::ConnectFailed)
            .with_endpoint("aa:bb")
            .with_attempt(3)
            .with_status(8)
            .with_reason("connection-failed");
        assert_eq!(ev.endpoint.as_deref(), Some("aa:bb"));
        assert_eq!(ev.attempt, Some(3));
        assert_eq!(ev.status, Some(8));
        assert_eq!(ev.reason.as_deref(), Some("connection-failed"));
    }

    #[test]
    fn test_delay_saturates_at_u32() {
        let ev = Event::new(EventKind::ReconnectAttempt)
            .with_delay(Duration::from_millis(u64::from(u32::MAX) + 10));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
