//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the link manager runtime.
//!
//! Config is consumed in two ways:
//! 1. **Manager creation**: `LinkManager::builder(config)`
//! 2. **Per-task defaults**: the default timeout policy reads
//!    [`Config::default_task_timeout`] unless a task carries an override.
//!
//! ## Sentinel values
//! - `delay_between_tasks = 0s` → no settle delay between task endings
//! - `phantom_fix_timeout = 0s` → the phantom-link repair never times out

use std::time::Duration;

/// Global configuration for the link manager runtime.
///
/// ## Field semantics
/// - `tick`: scheduler tick period; timeout resolution is bounded by it
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `delay_between_tasks`: settle time between one task ending and the next
///   arming (`0s` = none)
/// - `default_task_timeout`: per-attempt timeout applied when neither the task
///   nor the timeout policy overrides it
/// - `connect_fail_history_size`: bounded ring of past connect failures kept
///   per endpoint (oldest evicted first; min 1)
/// - `retry_connect_overall`: keep the retrying-connection flag visible while
///   a granted retry drives the endpoint back through disconnected
/// - `phantom_fix_enabled` / `phantom_fix_timeout`: the unbond/rebond repair
///   for links the stack misreports as closed
#[derive(Clone, Debug)]
pub struct Config {
    /// Scheduler tick period.
    pub tick: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// will skip older items. Minimum value is 1 (enforced by the bus).
    pub bus_capacity: usize,

    /// Settle delay between a task ending and the next task arming.
    ///
    /// Some stacks need breathing room after heavy operations. `0s` disables
    /// the delay.
    pub delay_between_tasks: Duration,

    /// Default per-attempt task timeout.
    pub default_task_timeout: Duration,

    /// Maximum number of connect-failure events remembered per endpoint.
    pub connect_fail_history_size: usize,

    /// Keep the retrying-connection state bit set across granted connect
    /// retries, so observers can distinguish "still trying overall" from a
    /// settled disconnect.
    pub retry_connect_overall: bool,

    /// Whether the phantom-link repair (unbond → rebond → reconnect cycle)
    /// may run when the stack reports a link closed that is provably open.
    pub phantom_fix_enabled: bool,

    /// Upper bound on one phantom-link repair cycle. `0s` = unbounded.
    pub phantom_fix_timeout: Duration,
}

impl Config {
    /// Returns the delay between tasks as an `Option` (`None` = disabled).
    #[inline]
    pub fn delay_between_tasks_opt(&self) -> Option<Duration> {
        if self.delay_between_tasks == Duration::ZERO {
            None
        } else {
            Some(self.delay_between_tasks)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the connect-fail history cap clamped to a minimum of 1.
    #[inline]
    pub fn history_size_clamped(&self) -> usize {
        self.connect_fail_history_size.max(1)
    }

    /// Returns the phantom-fix timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn phantom_fix_timeout_opt(&self) -> Option<Duration> {
        if self.phantom_fix_timeout == Duration::ZERO {
            None
        } else {
            Some(self.phantom_fix_timeout)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `tick = 25ms` (fine enough for cooperative timeouts)
    /// - `bus_capacity = 1024`
    /// - `delay_between_tasks = 0s` (no settle delay)
    /// - `default_task_timeout = 12.5s`
    /// - `connect_fail_history_size = 4`
    /// - `retry_connect_overall = true`
    /// - `phantom_fix_enabled = true`, `phantom_fix_timeout = 30s`
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(25),
            bus_capacity: 1024,
            delay_between_tasks: Duration::ZERO,
            default_task_timeout: Duration::from_millis(12_500),
            connect_fail_history_size: 4,
            retry_connect_overall: true,
            phantom_fix_enabled: true,
            phantom_fix_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        let mut cfg = Config::default();
        assert!(cfg.delay_between_tasks_opt().is_none());
        cfg.delay_between_tasks = Duration::from_millis(100);
        assert_eq!(
            cfg.delay_between_tasks_opt(),
            Some(Duration::from_millis(100))
        );

        cfg.phantom_fix_timeout = Duration::ZERO;
        assert!(cfg.phantom_fix_timeout_opt().is_none());

        cfg.connect_fail_history_size = 0;
        assert_eq!(cfg.history_size_clamped(), 1);
    }
}
