//! # Jitter applied to reconnect delays.
//!
//! When many endpoints drop at once (a gateway reboot, a radio reset), their
//! long-term reconnect sessions would otherwise fire in lockstep. [`Jitter`]
//! randomizes the policy-supplied delay to spread the attempts.
//!
//! - [`Jitter::None`] — no randomization, predictable delays
//! - [`Jitter::Full`] — random delay in `[0, delay]`
//! - [`Jitter::Equal`] — `delay/2 + random[0, delay/2]` (balanced)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of reconnect delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter: use the exact delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`; preserves ~75% of the delay on
    /// average.
    Equal,
}

impl Jitter {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let ms = delay.as_millis() as u64;
                if ms == 0 {
                    return delay;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
            }
            Jitter::Equal => {
                let ms = delay.as_millis() as u64;
                let half = ms / 2;
                if half == 0 {
                    return delay;
                }
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}
