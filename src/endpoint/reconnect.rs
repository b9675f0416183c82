//! # Reconnect sessions.
//!
//! Two independent [`ReconnectSession`]s exist per endpoint: short-term
//! (transparent, brief) and long-term (background persistence). A session
//! starts on an unexpected drop, accumulates elapsed time per tick, and
//! triggers a connect attempt once the policy-supplied delay has passed and
//! the endpoint is not already connecting. Each failed attempt re-queries the
//! policy for the next delay — unless the policy fixed an absolute session
//! timeout earlier, in which case delay queries stop and the session simply
//! ends when total elapsed time exceeds the timeout.
//!
//! The session itself is pure bookkeeping: the owning endpoint pushes/pops
//! the wake lock around start/end and applies state transitions.

use std::time::Duration;

use crate::policies::{
    ConnectionLostEvent, Inquiry, ReconnectDecision, ReconnectPolicy, SessionFlavor,
};
use crate::radio::{EndpointId, Status};

/// Why a session ended on its own. External cancellation goes through
/// [`ReconnectSession::cancel`] and has no tick-reported end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The policy said stop.
    PolicyStopped,
    /// The fixed session timeout elapsed.
    TimedOut,
}

/// What one tick of the session wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionTick {
    Idle,
    /// Trigger a connect attempt; `attempt` is 1-based for observability.
    Attempt { attempt: u32, delay: Duration },
    Ended(SessionEnd),
}

pub(crate) struct ReconnectSession {
    endpoint: EndpointId,
    flavor: SessionFlavor,
    running: bool,
    total_secs: f64,
    since_attempt_secs: f64,
    attempts: u32,
    delay_secs: f64,
    session_timeout_secs: Option<f64>,
    original_drop_status: Status,
}

impl ReconnectSession {
    pub fn new(endpoint: EndpointId, flavor: SessionFlavor) -> Self {
        Self {
            endpoint,
            flavor,
            running: false,
            total_secs: 0.0,
            since_attempt_secs: 0.0,
            attempts: 0,
            delay_secs: 0.0,
            session_timeout_secs: None,
            original_drop_status: Status::NOT_APPLICABLE,
        }
    }

    pub fn flavor(&self) -> SessionFlavor {
        self.flavor
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn total_elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.total_secs)
    }

    /// Protocol status of the drop that opened this session, kept for the
    /// eventual settle.
    pub fn original_drop_status(&self) -> Status {
        self.original_drop_status
    }

    /// Starts the session for an unexpected drop. Queries the policy for the
    /// initial delay; a stop/absent decision means the session never starts.
    /// Returns `true` if the session is running afterwards.
    pub fn attempt_start(&mut self, drop_status: Status, policy: &dyn ReconnectPolicy) -> bool {
        if self.running {
            return true;
        }

        self.total_secs = 0.0;
        self.since_attempt_secs = 0.0;
        self.attempts = 0;
        self.session_timeout_secs = None;

        match self.query(policy, Inquiry::NextDelay) {
            Some(ReconnectDecision::RetryIn(delay)) => {
                self.delay_secs = delay.as_secs_f64();
            }
            Some(ReconnectDecision::RetryWithTimeout {
                delay,
                session_timeout,
            }) => {
                self.delay_secs = delay.as_secs_f64();
                self.session_timeout_secs = Some(session_timeout.as_secs_f64());
            }
            Some(ReconnectDecision::Persist) | Some(ReconnectDecision::Stop) | None => {
                return false;
            }
        }

        self.running = true;
        self.original_drop_status = drop_status;
        true
    }

    /// Feeds one failed connect attempt into the session: bumps the attempt
    /// count and re-queries the delay, unless an absolute timeout was fixed.
    pub fn on_connect_failed(&mut self, policy: &dyn ReconnectPolicy) -> Option<SessionEnd> {
        if !self.running {
            return None;
        }

        self.attempts += 1;
        self.since_attempt_secs = 0.0;

        if let Some(timeout) = self.session_timeout_secs {
            if self.total_secs >= timeout {
                self.finish();
                return Some(SessionEnd::TimedOut);
            }
            return None;
        }

        match self.query(policy, Inquiry::NextDelay) {
            Some(ReconnectDecision::RetryIn(delay)) => {
                self.delay_secs = delay.as_secs_f64();
                None
            }
            Some(ReconnectDecision::RetryWithTimeout {
                delay,
                session_timeout,
            }) => {
                self.delay_secs = delay.as_secs_f64();
                self.session_timeout_secs = Some(session_timeout.as_secs_f64());
                None
            }
            Some(ReconnectDecision::Persist) => None,
            Some(ReconnectDecision::Stop) | None => {
                self.finish();
                Some(SessionEnd::PolicyStopped)
            }
        }
    }

    /// Advances the session one tick. `connecting` gates attempt triggering:
    /// while an attempt is in flight the session only accumulates time.
    pub fn update(
        &mut self,
        time_step: f64,
        connecting: bool,
        policy: &dyn ReconnectPolicy,
    ) -> SessionTick {
        if !self.running {
            return SessionTick::Idle;
        }

        self.total_secs += time_step;
        self.since_attempt_secs += time_step;

        if let Some(timeout) = self.session_timeout_secs {
            if self.total_secs >= timeout {
                self.finish();
                return SessionTick::Ended(SessionEnd::TimedOut);
            }
        }

        if self.since_attempt_secs >= self.delay_secs && !connecting {
            match self.query(policy, Inquiry::KeepGoing) {
                Some(ReconnectDecision::Stop) | None => {
                    self.finish();
                    return SessionTick::Ended(SessionEnd::PolicyStopped);
                }
                _ => {}
            }
            self.since_attempt_secs = 0.0;
            return SessionTick::Attempt {
                attempt: self.attempts + 1,
                delay: Duration::from_secs_f64(self.delay_secs),
            };
        }

        SessionTick::Idle
    }

    /// External cancellation (explicit disconnect, success). Returns `true`
    /// if the session was running.
    pub fn cancel(&mut self) -> bool {
        let was_running = self.running;
        self.finish();
        was_running
    }

    fn finish(&mut self) {
        self.running = false;
        self.attempts = 0;
        self.total_secs = 0.0;
        self.since_attempt_secs = 0.0;
        self.session_timeout_secs = None;
        self.original_drop_status = Status::NOT_APPLICABLE;
    }

    fn query(&self, policy: &dyn ReconnectPolicy, inquiry: Inquiry) -> Option<ReconnectDecision> {
        policy.on_connection_lost(&ConnectionLostEvent {
            endpoint: self.endpoint.clone(),
            flavor: self.flavor,
            inquiry,
            attempt: self.attempts,
            total_elapsed: Duration::from_secs_f64(self.total_secs),
            previous_delay: Duration::from_secs_f64(self.delay_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_delay(delay: Duration) -> impl ReconnectPolicy {
        move |ev: &ConnectionLostEvent| match ev.inquiry {
            Inquiry::NextDelay => Some(ReconnectDecision::RetryIn(delay)),
            Inquiry::KeepGoing => Some(ReconnectDecision::Persist),
        }
    }

    fn session() -> ReconnectSession {
        ReconnectSession::new(EndpointId::new("ep"), SessionFlavor::ShortTerm)
    }

    #[test]
    fn test_disabled_policy_never_starts_session() {
        let mut s = session();
        let policy = |_: &ConnectionLostEvent| Some(ReconnectDecision::Stop);
        assert!(!s.attempt_start(Status::PEER_TERMINATED, &policy));
        assert!(!s.is_running());

        let absent = |_: &ConnectionLostEvent| None;
        assert!(!s.attempt_start(Status::PEER_TERMINATED, &absent));
        assert!(!s.is_running());
    }

    #[test]
    fn test_attempt_fires_after_delay_elapsed() {
        let mut s = session();
        let policy = fixed_delay(Duration::from_secs(1));
        assert!(s.attempt_start(Status::PEER_TERMINATED, &policy));

        // 0.9s: nothing yet.
        for _ in 0..9 {
            assert_eq!(s.update(0.1, false, &policy), SessionTick::Idle);
        }
        // 1.0s: exactly one attempt.
        match s.update(0.1, false, &policy) {
            SessionTick::Attempt { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected attempt, got {other:?}"),
        }
        // While connecting, no further attempts pile up.
        assert_eq!(s.update(5.0, true, &policy), SessionTick::Idle);
    }

    #[test]
    fn test_fixed_timeout_stops_delay_queries_and_ends_session() {
        let mut s = session();
        let queries = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let queries_clone = queries.clone();
        let policy = move |ev: &ConnectionLostEvent| match ev.inquiry {
            Inquiry::NextDelay => {
                queries_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Some(ReconnectDecision::RetryWithTimeout {
                    delay: Duration::from_secs(1),
                    session_timeout: Duration::from_secs(3),
                })
            }
            Inquiry::KeepGoing => Some(ReconnectDecision::Persist),
        };

        assert!(s.attempt_start(Status::PEER_TERMINATED, &policy));
        assert_eq!(queries.load(std::sync::atomic::Ordering::SeqCst), 1);

        s.update(1.0, false, &policy);
        assert!(s.on_connect_failed(&policy).is_none());
        // The timeout was fixed at start: no second delay query.
        assert_eq!(queries.load(std::sync::atomic::Ordering::SeqCst), 1);

        s.update(1.0, true, &policy);
        s.update(1.0, true, &policy);
        assert_eq!(
            s.update(0.1, true, &policy),
            SessionTick::Ended(SessionEnd::TimedOut)
        );
        assert!(!s.is_running());
    }

    #[test]
    fn test_policy_stop_on_failure_ends_session() {
        let mut s = session();
        let policy = fixed_delay(Duration::from_millis(100));
        assert!(s.attempt_start(Status::PEER_TERMINATED, &policy));
        assert_eq!(s.attempts(), 0);

        let stopping = |_: &ConnectionLostEvent| Some(ReconnectDecision::Stop);
        assert_eq!(
            s.on_connect_failed(&stopping),
            Some(SessionEnd::PolicyStopped)
        );
        assert!(!s.is_running());
    }

    #[test]
    fn test_cancel_reports_running_state() {
        let mut s = session();
        let policy = fixed_delay(Duration::from_secs(1));
        assert!(!s.cancel());
        s.attempt_start(Status::PEER_TERMINATED, &policy);
        assert!(s.cancel());
        assert!(!s.is_running());
        assert_eq!(s.attempts(), 0);
    }
}
