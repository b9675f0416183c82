//! # Per-endpoint connect-failure bookkeeping and decisions.
//!
//! [`ConnectionFailManager`] is invoked once per failed connect attempt. It
//! keeps the attempt counter, the first/last attempt timestamps, the highest
//! lifecycle stage the series ever reached, and a bounded ring of past
//! failure events. The counter resets on explicit disconnect, explicit new
//! connect request, and full successful initialization — and on nothing else:
//! when a policy settles the endpoint, the counter freezes for later
//! inspection.

use std::collections::VecDeque;

use crate::policies::{ConnectFailDecision, ConnectFailEvent, DisconnectReason};
use crate::radio::EndpointId;
use crate::state::ConnectStage;

pub(crate) struct ConnectionFailManager {
    endpoint: EndpointId,
    fail_count: u32,
    time_of_first_connect: Option<u64>,
    time_of_last_fail: Option<u64>,
    highest_stage: ConnectStage,
    history: VecDeque<ConnectFailEvent>,
    history_cap: usize,
    /// Set when the long-term session gave up; blocks further retries until
    /// the next reset.
    tried_long_term: bool,
    /// Decision parked while the endpoint is still connected (retry cannot be
    /// applied yet).
    pending_retry: Option<ConnectFailDecision>,
}

impl ConnectionFailManager {
    pub fn new(endpoint: EndpointId, history_cap: usize) -> Self {
        Self {
            endpoint,
            fail_count: 0,
            time_of_first_connect: None,
            time_of_last_fail: None,
            highest_stage: ConnectStage::None,
            history: VecDeque::new(),
            history_cap: history_cap.max(1),
            tried_long_term: false,
            pending_retry: None,
        }
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn highest_stage(&self) -> ConnectStage {
        self.highest_stage
    }

    pub fn history(&self) -> Vec<ConnectFailEvent> {
        self.history.iter().cloned().collect()
    }

    pub fn tried_long_term(&self) -> bool {
        self.tried_long_term
    }

    pub fn on_long_term_timed_out(&mut self) {
        self.tried_long_term = true;
    }

    pub fn on_explicit_disconnect(&mut self) {
        self.reset();
    }

    pub fn on_fully_initialized(&mut self) {
        self.reset();
    }

    pub fn on_explicit_connect(&mut self, now_ms: u64) {
        self.reset();
        self.time_of_first_connect = Some(now_ms);
    }

    pub fn set_pending_retry(&mut self, decision: ConnectFailDecision) {
        self.pending_retry = Some(decision);
    }

    pub fn take_pending_retry(&mut self) -> Option<ConnectFailDecision> {
        self.pending_retry.take()
    }

    /// Records one failed attempt: bumps (or, inside a long-term session,
    /// pins) the counter, advances the highest stage, appends to the bounded
    /// history, and returns the event for policies and observers.
    pub fn record_failure(&mut self, reason: &DisconnectReason, now_ms: u64) -> ConnectFailEvent {
        // A spontaneous connect may fail without an explicit request ever
        // having stamped the series start.
        let first = *self.time_of_first_connect.get_or_insert(now_ms);
        let last = self.time_of_last_fail.unwrap_or(first);

        if reason.during_long_term_reconnect {
            self.fail_count = 1;
        } else {
            self.fail_count += 1;
        }
        self.highest_stage = self.highest_stage.max(reason.stage);

        let event = ConnectFailEvent {
            endpoint: self.endpoint.clone(),
            attempt: self.fail_count,
            reason: reason.clone(),
            highest_stage: self.highest_stage,
            attempt_time_latest: std::time::Duration::from_millis(now_ms.saturating_sub(last)),
            attempt_time_total: std::time::Duration::from_millis(now_ms.saturating_sub(first)),
        };

        if self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        self.time_of_last_fail = Some(now_ms);

        event
    }

    fn reset(&mut self) {
        self.fail_count = 0;
        self.time_of_first_connect = None;
        self.time_of_last_fail = None;
        self.highest_stage = ConnectStage::None;
        self.history.clear();
        self.tried_long_term = false;
        self.pending_retry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{FailureKind, Timing};
    use crate::radio::Status;

    fn reason(stage: ConnectStage) -> DisconnectReason {
        DisconnectReason {
            kind: FailureKind::ConnectionFailed,
            status: Status::ESTABLISHMENT_FAILED,
            timing: Timing::Eventually,
            stage,
            during_long_term_reconnect: false,
        }
    }

    fn manager() -> ConnectionFailManager {
        ConnectionFailManager::new(EndpointId::new("ep"), 3)
    }

    #[test]
    fn test_counter_counts_and_freezes() {
        let mut m = manager();
        m.on_explicit_connect(0);
        for i in 1..=3 {
            let ev = m.record_failure(&reason(ConnectStage::Connecting), i * 1_000);
            assert_eq!(ev.attempt, i as u32);
        }
        assert_eq!(m.fail_count(), 3);
        // Settling does not reset anything; only the triggers do.
        assert_eq!(m.fail_count(), 3);
        m.on_explicit_connect(10_000);
        assert_eq!(m.fail_count(), 0);
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut m = manager();
        m.on_explicit_connect(0);
        for i in 1..=5u64 {
            m.record_failure(&reason(ConnectStage::Connecting), i * 1_000);
        }
        let history = m.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].attempt, 3);
        assert_eq!(history[2].attempt, 5);
    }

    #[test]
    fn test_highest_stage_is_sticky_maximum() {
        let mut m = manager();
        m.on_explicit_connect(0);
        m.record_failure(&reason(ConnectStage::Discovering), 1_000);
        m.record_failure(&reason(ConnectStage::Connecting), 2_000);
        assert_eq!(m.highest_stage(), ConnectStage::Discovering);
    }

    #[test]
    fn test_long_term_session_pins_counter_to_one() {
        let mut m = manager();
        m.on_explicit_connect(0);
        m.record_failure(&reason(ConnectStage::Connecting), 1_000);
        m.record_failure(&reason(ConnectStage::Connecting), 2_000);

        let mut in_session = reason(ConnectStage::Connecting);
        in_session.during_long_term_reconnect = true;
        let ev = m.record_failure(&in_session, 3_000);
        assert_eq!(ev.attempt, 1);
        assert_eq!(m.fail_count(), 1);
    }

    #[test]
    fn test_attempt_times_derive_from_stamps() {
        let mut m = manager();
        m.on_explicit_connect(1_000);
        let first = m.record_failure(&reason(ConnectStage::Connecting), 3_000);
        assert_eq!(first.attempt_time_latest.as_millis(), 2_000);
        assert_eq!(first.attempt_time_total.as_millis(), 2_000);

        let second = m.record_failure(&reason(ConnectStage::Connecting), 6_000);
        assert_eq!(second.attempt_time_latest.as_millis(), 3_000);
        assert_eq!(second.attempt_time_total.as_millis(), 5_000);
    }

    #[test]
    fn test_reset_triggers() {
        let mut m = manager();
        m.on_explicit_connect(0);
        m.record_failure(&reason(ConnectStage::Connecting), 1_000);
        m.on_long_term_timed_out();
        assert!(m.tried_long_term());

        m.on_fully_initialized();
        assert_eq!(m.fail_count(), 0);
        assert!(!m.tried_long_term());
        assert!(m.history().is_empty());
    }
}
