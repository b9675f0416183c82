//! # Phantom-link repair.
//!
//! Some stacks report a link as disconnected right after the first bond while
//! the underlying connection is provably still open: no other central can see
//! the endpoint, yet the stack's own raw query says connected. The repair
//! forces the link through an unbond → rebond → reconnect cycle on the
//! ordinary task queue, then disconnects cleanly — leaving unrelated queued
//! tasks for the endpoint alone.
//!
//! This type is the passive state machine; the owning endpoint probes the
//! radio, widens the tracked-states filter, installs the ephemeral listener,
//! and enqueues the tasks.

/// Where the repair currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Unbonding,
    Bonding,
    Reconnecting,
}

pub(crate) struct PhantomLinkFix {
    phase: Phase,
    time_fixing_secs: f64,
    saved_tracked: Option<u32>,
}

impl PhantomLinkFix {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            time_fixing_secs: 0.0,
            saved_tracked: None,
        }
    }

    pub fn is_fixing(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Starts a repair cycle. Returns `false` if one is already running.
    pub fn begin(&mut self, saved_tracked: u32) -> bool {
        if self.is_fixing() {
            return false;
        }
        self.phase = Phase::Unbonding;
        self.time_fixing_secs = 0.0;
        self.saved_tracked = Some(saved_tracked);
        true
    }

    /// Unbond finished. Returns `true` if the bond step should be queued.
    pub fn on_unbond_done(&mut self, success: bool) -> bool {
        if self.phase != Phase::Unbonding {
            return false;
        }
        if success {
            self.phase = Phase::Bonding;
            true
        } else {
            self.phase = Phase::Idle;
            false
        }
    }

    /// Bond finished. Returns `true` if the reconnect step should be queued.
    pub fn on_bond_done(&mut self, success: bool) -> bool {
        if self.phase != Phase::Bonding {
            return false;
        }
        if success {
            self.phase = Phase::Reconnecting;
            true
        } else {
            self.phase = Phase::Idle;
            false
        }
    }

    /// The link came back up. Returns `true` if this repair was waiting for
    /// it (the endpoint then disconnects cleanly and restores).
    pub fn on_reconnected(&mut self) -> bool {
        if self.phase != Phase::Reconnecting {
            return false;
        }
        self.phase = Phase::Idle;
        true
    }

    /// Advances the repair timer. Returns `true` once when the configured
    /// timeout is exceeded; the repair is abandoned.
    pub fn update(&mut self, time_step: f64, timeout_secs: Option<f64>) -> bool {
        if !self.is_fixing() {
            return false;
        }
        self.time_fixing_secs += time_step;
        if let Some(timeout) = timeout_secs {
            if self.time_fixing_secs >= timeout {
                self.phase = Phase::Idle;
                return true;
            }
        }
        false
    }

    /// Abandons the repair (step failure, timeout, teardown).
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
        self.time_fixing_secs = 0.0;
    }

    /// The tracked-states filter displaced by [`begin`](Self::begin), to be
    /// restored exactly once.
    pub fn take_saved_tracked(&mut self) -> Option<u32> {
        self.saved_tracked.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut fix = PhantomLinkFix::new();
        assert!(fix.begin(0b101));
        assert!(fix.is_fixing());
        assert!(!fix.begin(0), "no concurrent repairs");

        assert!(fix.on_unbond_done(true));
        assert!(fix.on_bond_done(true));
        assert!(fix.on_reconnected());
        assert!(!fix.is_fixing());
        assert_eq!(fix.take_saved_tracked(), Some(0b101));
        assert_eq!(fix.take_saved_tracked(), None, "restored exactly once");
    }

    #[test]
    fn test_step_failure_abandons() {
        let mut fix = PhantomLinkFix::new();
        fix.begin(0);
        assert!(!fix.on_unbond_done(false));
        assert!(!fix.is_fixing());
    }

    #[test]
    fn test_out_of_phase_signals_ignored() {
        let mut fix = PhantomLinkFix::new();
        assert!(!fix.on_unbond_done(true));
        assert!(!fix.on_bond_done(true));
        assert!(!fix.on_reconnected());

        fix.begin(0);
        assert!(!fix.on_bond_done(true), "bond result before unbond result");
        assert!(fix.is_fixing());
    }

    #[test]
    fn test_timeout_fires_once() {
        let mut fix = PhantomLinkFix::new();
        fix.begin(0);
        assert!(!fix.update(1.0, Some(3.0)));
        assert!(!fix.update(1.0, Some(3.0)));
        assert!(fix.update(1.0, Some(3.0)));
        assert!(!fix.is_fixing());
        assert!(!fix.update(1.0, Some(3.0)), "idle repair does not time out");
    }

    #[test]
    fn test_unbounded_repair_never_times_out() {
        let mut fix = PhantomLinkFix::new();
        fix.begin(0);
        assert!(!fix.update(1_000.0, None));
        assert!(fix.is_fixing());
    }
}
