//! # Connect-failure context and retry decisions.
//!
//! When a connect attempt fails, the fail engine builds a [`ConnectFailEvent`]
//! and asks the resolution-ordered policy chain (per-endpoint listener >
//! manager default > built-in default) whether to retry. Canceled attempts
//! never reach a policy — they are always do-not-retry — and attempts inside a
//! running reconnect session defer to that session.

use std::time::Duration;

use crate::radio::{EndpointId, Status};
use crate::state::ConnectStage;
use crate::tasks::Priority;

/// Classification of why a connect attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stack reported the link could not be opened.
    ConnectionFailed,
    /// The link opened but attribute discovery failed.
    DiscoveryFailed,
    /// Authentication/encryption failed during the pipeline.
    AuthenticationFailed,
    /// Post-discovery setup failed.
    InitializationFailed,
    /// The attempt was withdrawn by an explicit disconnect.
    CanceledFromDisconnect,
    /// The attempt was withdrawn because the radio is turning off.
    CanceledFromRadioOff,
}

impl FailureKind {
    /// Canceled attempts are administrative: they never count against retry
    /// budgets and always resolve do-not-retry.
    #[inline]
    pub fn is_canceled(self) -> bool {
        matches!(
            self,
            FailureKind::CanceledFromDisconnect | FailureKind::CanceledFromRadioOff
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureKind::ConnectionFailed => "connection-failed",
            FailureKind::DiscoveryFailed => "discovery-failed",
            FailureKind::AuthenticationFailed => "authentication-failed",
            FailureKind::InitializationFailed => "initialization-failed",
            FailureKind::CanceledFromDisconnect => "canceled-from-disconnect",
            FailureKind::CanceledFromRadioOff => "canceled-from-radio-off",
        }
    }
}

/// When in the attempt's lifetime the failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    NotApplicable,
    /// The call was refused before anything went over the air.
    Immediately,
    /// The asynchronous completion carried the failure.
    Eventually,
    /// No completion arrived at all.
    TimedOut,
}

/// Structured reason handed to the fail engine for one failed attempt.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    pub kind: FailureKind,
    /// Underlying protocol status, preserved for diagnostics.
    pub status: Status,
    pub timing: Timing,
    /// How far this attempt got.
    pub stage: ConnectStage,
    /// Whether the attempt belonged to a long-term reconnect session.
    pub during_long_term_reconnect: bool,
}

/// Context for one failed connect attempt, as seen by policies and kept in
/// the bounded per-endpoint history.
#[derive(Debug, Clone)]
pub struct ConnectFailEvent {
    pub endpoint: EndpointId,
    /// Attempt counter at the time of this failure (1-based).
    pub attempt: u32,
    pub reason: DisconnectReason,
    /// Highest lifecycle stage reached across the whole attempt series.
    pub highest_stage: ConnectStage,
    /// Time spent on this attempt.
    pub attempt_time_latest: Duration,
    /// Time since the first attempt of the series.
    pub attempt_time_total: Duration,
}

/// Retry decision returned by a [`ConnectFailPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailDecision {
    /// Queue another connect attempt.
    Retry,
    /// Queue another connect attempt at the given priority instead of the
    /// implicit default.
    RetryWithPriority(Priority),
    /// Settle to disconnected.
    DoNotRetry,
}

impl ConnectFailDecision {
    #[inline]
    pub fn is_retry(self) -> bool {
        !matches!(self, ConnectFailDecision::DoNotRetry)
    }

    /// Priority override carried by the decision, if any.
    pub fn priority(self) -> Option<Priority> {
        match self {
            ConnectFailDecision::RetryWithPriority(p) => Some(p),
            _ => None,
        }
    }
}

/// Decides whether a failed connect attempt is retried.
///
/// Returning `None` falls back to the next policy in the chain, and finally
/// to the conservative default (do not retry).
pub trait ConnectFailPolicy: Send + Sync + 'static {
    fn on_connect_failed(&self, event: &ConnectFailEvent) -> Option<ConnectFailDecision>;
}

impl<F> ConnectFailPolicy for F
where
    F: Fn(&ConnectFailEvent) -> Option<ConnectFailDecision> + Send + Sync + 'static,
{
    fn on_connect_failed(&self, event: &ConnectFailEvent) -> Option<ConnectFailDecision> {
        self(event)
    }
}

/// Built-in default: retry a small fixed number of times, then give up.
#[derive(Debug, Clone, Copy)]
pub struct DefaultConnectFailPolicy {
    /// How many failed attempts are retried before settling.
    pub max_retries: u32,
}

impl Default for DefaultConnectFailPolicy {
    /// Two retries, mirroring how flaky first connects usually behave: one
    /// retry catches most transient establishment failures, the second is for
    /// luck, anything beyond that needs an application decision.
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl ConnectFailPolicy for DefaultConnectFailPolicy {
    fn on_connect_failed(&self, event: &ConnectFailEvent) -> Option<ConnectFailDecision> {
        if event.attempt <= self.max_retries {
            Some(ConnectFailDecision::Retry)
        } else {
            Some(ConnectFailDecision::DoNotRetry)
        }
    }
}
