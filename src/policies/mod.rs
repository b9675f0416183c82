//! Pluggable decision policies.
//!
//! All policies are pure decision functions. An absent (`None`) decision
//! always falls back to the conservative default: do not retry, no delay.

mod bond;
mod connect_fail;
mod jitter;
mod reconnect;
mod timeout;

pub use bond::{BondFailEvent, BondRetryPolicy, DefaultBondRetryPolicy};
pub use connect_fail::{
    ConnectFailDecision, ConnectFailEvent, ConnectFailPolicy, DefaultConnectFailPolicy,
    DisconnectReason, FailureKind, Timing,
};
pub use jitter::Jitter;
pub use reconnect::{
    ConnectionLostEvent, DefaultReconnectPolicy, Inquiry, ReconnectDecision, ReconnectPolicy,
    SessionFlavor,
};
pub use timeout::{DefaultTimeoutPolicy, TimeoutPolicy, TimeoutRequest};

use std::sync::Arc;

/// The manager-level policy bundle. Per-endpoint listeners sit in front of
/// these; the built-in defaults sit behind everything.
#[derive(Clone)]
pub struct PolicySet {
    pub connect_fail: Arc<dyn ConnectFailPolicy>,
    pub reconnect: Arc<dyn ReconnectPolicy>,
    pub bond: Arc<dyn BondRetryPolicy>,
    pub timeout: Arc<dyn TimeoutPolicy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            connect_fail: Arc::new(DefaultConnectFailPolicy::default()),
            reconnect: Arc::new(DefaultReconnectPolicy::default()),
            bond: Arc::new(DefaultBondRetryPolicy::default()),
            timeout: Arc::new(DefaultTimeoutPolicy::default()),
        }
    }
}
