//! # Reconnect-session policy.
//!
//! A reconnect session asks its policy two kinds of question:
//!
//! - [`Inquiry::NextDelay`]: "how long until the next attempt?" — asked when
//!   the session starts and after each failed attempt (unless an absolute
//!   session timeout was fixed earlier, in which case delay queries stop).
//! - [`Inquiry::KeepGoing`]: "should this session continue at all?" — asked
//!   periodically while running.
//!
//! Returning [`ReconnectDecision::Stop`] (or `None`, the conservative
//! fallback) to the initial `NextDelay` means the session never starts.

use std::time::Duration;

use crate::radio::EndpointId;

use super::jitter::Jitter;

/// Which session is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlavor {
    /// Transparent, brief recovery: the endpoint is still treated as present.
    ShortTerm,
    /// The endpoint is gone; keep trying in the background.
    LongTerm,
}

impl SessionFlavor {
    pub fn label(self) -> &'static str {
        match self {
            SessionFlavor::ShortTerm => "short-term",
            SessionFlavor::LongTerm => "long-term",
        }
    }
}

/// What the session wants to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inquiry {
    /// Delay until the next connect attempt.
    NextDelay,
    /// Whether the session should continue running.
    KeepGoing,
}

/// Context for one policy query.
#[derive(Debug, Clone)]
pub struct ConnectionLostEvent {
    pub endpoint: EndpointId,
    pub flavor: SessionFlavor,
    pub inquiry: Inquiry,
    /// Failed attempts so far in this session.
    pub attempt: u32,
    /// Total time this session has been running.
    pub total_elapsed: Duration,
    /// The delay used before the previous attempt.
    pub previous_delay: Duration,
}

/// Decision returned by a [`ReconnectPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Attempt again after the given delay.
    RetryIn(Duration),
    /// Attempt again after `delay`, and fix an absolute session timeout: no
    /// further delay queries are made, the session simply ends once total
    /// elapsed time exceeds `session_timeout`.
    RetryWithTimeout {
        delay: Duration,
        session_timeout: Duration,
    },
    /// Keep the session running with its current delay.
    Persist,
    /// End the session (or never start it).
    Stop,
}

/// Decides reconnect pacing. `None` falls back to [`ReconnectDecision::Stop`].
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn on_connection_lost(&self, event: &ConnectionLostEvent) -> Option<ReconnectDecision>;
}

impl<F> ReconnectPolicy for F
where
    F: Fn(&ConnectionLostEvent) -> Option<ReconnectDecision> + Send + Sync + 'static,
{
    fn on_connection_lost(&self, event: &ConnectionLostEvent) -> Option<ReconnectDecision> {
        self(event)
    }
}

/// Built-in default pacing.
#[derive(Debug, Clone, Copy)]
pub struct DefaultReconnectPolicy {
    /// Delay between short-term attempts.
    pub short_term_rate: Duration,
    /// Absolute window for the short-term session.
    pub short_term_timeout: Duration,
    /// Delay between long-term attempts (jitter applied).
    pub long_term_rate: Duration,
    /// Absolute window for the long-term session; `None` = unbounded.
    pub long_term_timeout: Option<Duration>,
    /// Jitter applied to long-term delays.
    pub jitter: Jitter,
}

impl Default for DefaultReconnectPolicy {
    /// Short term: attempt every second for at most five seconds. Long term:
    /// attempt every five seconds with equal jitter, forever.
    fn default() -> Self {
        Self {
            short_term_rate: Duration::from_secs(1),
            short_term_timeout: Duration::from_secs(5),
            long_term_rate: Duration::from_secs(5),
            long_term_timeout: None,
            jitter: Jitter::Equal,
        }
    }
}

impl ReconnectPolicy for DefaultReconnectPolicy {
    fn on_connection_lost(&self, event: &ConnectionLostEvent) -> Option<ReconnectDecision> {
        match (event.flavor, event.inquiry) {
            (SessionFlavor::ShortTerm, Inquiry::NextDelay) => {
                if event.attempt == 0 {
                    Some(ReconnectDecision::RetryWithTimeout {
                        delay: self.short_term_rate,
                        session_timeout: self.short_term_timeout,
                    })
                } else {
                    Some(ReconnectDecision::RetryIn(self.short_term_rate))
                }
            }
            (SessionFlavor::LongTerm, Inquiry::NextDelay) => {
                if event.attempt == 0 {
                    if let Some(timeout) = self.long_term_timeout {
                        return Some(ReconnectDecision::RetryWithTimeout {
                            delay: self.jitter.apply(self.long_term_rate),
                            session_timeout: timeout,
                        });
                    }
                }
                Some(ReconnectDecision::RetryIn(self.jitter.apply(self.long_term_rate)))
            }
            (_, Inquiry::KeepGoing) => Some(ReconnectDecision::Persist),
        }
    }
}
