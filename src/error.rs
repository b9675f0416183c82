//! Error types used by the linkvisor runtime and tasks.
//!
//! This module defines two main error enums:
//!
//! - [`TaskError`] — why an individual task ended unsuccessfully.
//! - [`RuntimeError`] — failures in the runtime plumbing itself.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for
//! logging/metrics, and [`TaskError::is_retryable`] distinguishes outcomes a
//! retry policy may act on from administrative ones.
//!
//! Administrative endings (cancelled, softly cancelled, cleared, redundant)
//! are *not* errors — they are task states, reported through
//! [`TaskOutcome`](crate::tasks::TaskOutcome) — so policies never charge them
//! against retry budgets.

use std::time::Duration;
use thiserror::Error;

use crate::radio::Status;

/// # Errors produced by task execution.
///
/// These describe why a task reached `Failed`, `FailedImmediately`, or
/// `TimedOut` rather than `Succeeded`.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// A required precondition (radio on, connection established) was false
    /// when the task came up for execution. No radio call was made.
    #[error("precondition failed: {condition}")]
    Precondition {
        /// Label of the precondition that did not hold.
        condition: &'static str,
    },

    /// The radio layer synchronously refused the call. No operation is in
    /// flight.
    #[error("radio rejected call: {reason}")]
    Rejected {
        /// Human-readable rejection reason from the radio seam.
        reason: String,
    },

    /// The asynchronous completion carried a non-success protocol status.
    #[error("protocol failure, status {status}")]
    Protocol {
        /// Status code preserved for diagnostics.
        status: Status,
    },

    /// No completion arrived within the allotted duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Precondition { .. } => "task_precondition_failed",
            TaskError::Rejected { .. } => "task_rejected",
            TaskError::Protocol { .. } => "task_protocol_failure",
            TaskError::Timeout { .. } => "task_timeout",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Precondition { condition } => format!("precondition: {condition}"),
            TaskError::Rejected { reason } => format!("rejected: {reason}"),
            TaskError::Protocol { status } => format!("protocol status: {status}"),
            TaskError::Timeout { timeout } => format!("timeout: {timeout:?}"),
        }
    }

    /// Indicates whether the failure is one a retry policy may act on.
    ///
    /// Connection retries are driven exclusively by the connection-fail and
    /// reconnect engines; this helper exists for policies inspecting failure
    /// context, not for task-level self-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Protocol { .. } | TaskError::Timeout { .. })
    }
}

/// # Errors produced by the runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The driver loop was started twice; the command receiver is already
    /// taken.
    #[error("driver loop already running")]
    AlreadyRunning,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyRunning => "runtime_already_running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = TaskError::Timeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.as_label(), "task_timeout");
        assert!(err.is_retryable());

        let err = TaskError::Precondition {
            condition: "connected",
        };
        assert_eq!(err.as_label(), "task_precondition_failed");
        assert!(!err.is_retryable());
    }
}
