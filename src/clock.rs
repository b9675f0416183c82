//! # Clock driver for the tick-stepped core.
//!
//! The scheduler, reconnect sessions, and state trackers never read wall time
//! directly. Everything flows through a [`Clock`], which supplies the tick
//! period and a millisecond timestamp once per step. This keeps the core
//! deterministic under test: drive [`LinkManager::step`](crate::LinkManager::step)
//! with a [`ManualClock`] and time moves exactly as far as you say.
//!
//! ## Rules
//! - `time_step()` is the nominal duration of one scheduler tick.
//! - `now_ms()` is monotonic-enough wall time in milliseconds; it is only ever
//!   compared against other values from the same clock.
//! - Timeout resolution is bounded by the tick period (timeouts are checked
//!   cooperatively once per tick, never via OS timers).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Supplies `(time_step, now_ms)` to the core once per tick.
pub trait Clock: Send + Sync + 'static {
    /// Nominal duration of one scheduler tick.
    fn time_step(&self) -> Duration;

    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock implementation with a fixed tick period.
pub struct SystemClock {
    step: Duration,
}

impl SystemClock {
    /// Creates a system clock ticking at the given period.
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Clock for SystemClock {
    fn time_step(&self) -> Duration {
        self.step
    }

    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-cranked clock for tests.
///
/// `advance()` moves time forward; `now_ms()` reflects exactly what was
/// advanced. The step reported by `time_step()` is whatever the test chose.
pub struct ManualClock {
    step: Duration,
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            now: AtomicU64::new(0),
        }
    }

    /// Advances the clock by `d`.
    pub fn advance(&self, d: Duration) {
        self.now.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the absolute time in milliseconds.
    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn time_step(&self) -> Duration {
        self.step
    }

    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Duration::from_millis(10));
        assert_eq!(clock.now_ms(), 0);
        clock.advance(Duration::from_millis(25));
        assert_eq!(clock.now_ms(), 25);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ms(), 1025);
    }

    #[test]
    fn test_system_clock_reports_step() {
        let clock = SystemClock::new(Duration::from_millis(20));
        assert_eq!(clock.time_step(), Duration::from_millis(20));
        assert!(clock.now_ms() > 0);
    }
}
