//! Per-task-kind timeout policy.

use std::time::Duration;

use crate::radio::EndpointId;
use crate::tasks::TaskKind;

/// Context for one timeout query, made when a task arms.
#[derive(Debug, Clone)]
pub struct TimeoutRequest {
    pub kind: TaskKind,
    pub endpoint: Option<EndpointId>,
}

/// Computes the per-attempt timeout for a task. A per-task override on the
/// task itself takes precedence over this policy.
pub trait TimeoutPolicy: Send + Sync + 'static {
    fn timeout_for(&self, request: &TimeoutRequest) -> Duration;
}

impl<F> TimeoutPolicy for F
where
    F: Fn(&TimeoutRequest) -> Duration + Send + Sync + 'static,
{
    fn timeout_for(&self, request: &TimeoutRequest) -> Duration {
        self(request)
    }
}

/// Built-in default: one flat timeout for every kind.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTimeoutPolicy {
    pub timeout: Duration,
}

impl Default for DefaultTimeoutPolicy {
    /// 12.5 seconds — generous enough for the slowest bonded connect
    /// pipelines observed in the wild, short enough to notice a dead stack.
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(12_500),
        }
    }
}

impl TimeoutPolicy for DefaultTimeoutPolicy {
    fn timeout_for(&self, _request: &TimeoutRequest) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_flat() {
        let policy = DefaultTimeoutPolicy::default();
        let req = TimeoutRequest {
            kind: TaskKind::Connect,
            endpoint: Some(EndpointId::new("ep")),
        };
        assert_eq!(policy.timeout_for(&req), Duration::from_millis(12_500));
    }

    #[test]
    fn test_closure_policy_by_kind() {
        let policy = |req: &TimeoutRequest| match req.kind {
            TaskKind::Connect => Duration::from_secs(20),
            _ => Duration::from_secs(5),
        };
        let connect = TimeoutRequest {
            kind: TaskKind::Connect,
            endpoint: None,
        };
        let read = TimeoutRequest {
            kind: TaskKind::Read,
            endpoint: None,
        };
        assert_eq!(policy.timeout_for(&connect), Duration::from_secs(20));
        assert_eq!(policy.timeout_for(&read), Duration::from_secs(5));
    }
}
