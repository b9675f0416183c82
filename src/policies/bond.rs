//! Bond-retry policy.

use crate::radio::{EndpointId, Status};

/// Context for one failed bond attempt.
#[derive(Debug, Clone)]
pub struct BondFailEvent {
    pub endpoint: EndpointId,
    /// Failed bond attempts so far (1-based).
    pub attempt: u32,
    pub status: Status,
}

/// Decides whether a failed bond attempt is retried. Bond retries ride the
/// ordinary task queue; they never loop inside a task.
pub trait BondRetryPolicy: Send + Sync + 'static {
    fn should_retry(&self, event: &BondFailEvent) -> bool;
}

impl<F> BondRetryPolicy for F
where
    F: Fn(&BondFailEvent) -> bool + Send + Sync + 'static,
{
    fn should_retry(&self, event: &BondFailEvent) -> bool {
        self(event)
    }
}

/// Built-in default: retry a couple of times, but never when the peer
/// positively refused authentication (a popup was likely dismissed, retrying
/// would nag).
#[derive(Debug, Clone, Copy)]
pub struct DefaultBondRetryPolicy {
    pub max_retries: u32,
}

impl Default for DefaultBondRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl BondRetryPolicy for DefaultBondRetryPolicy {
    fn should_retry(&self, event: &BondFailEvent) -> bool {
        if event.status == Status::INSUFFICIENT_AUTHENTICATION {
            return false;
        }
        event.attempt <= self.max_retries
    }
}
