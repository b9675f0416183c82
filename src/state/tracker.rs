//! # Generic bitmask state tracker.
//!
//! [`StateTracker`] tracks a fixed set of named boolean conditions for one
//! endpoint (or the manager itself). Every mutation computes a candidate mask,
//! applies it atomically, and diffs against the previous mask to find bits
//! that actually flipped. For each flipped bit it maintains the intent mask
//! (which changes were explicitly requested) and enter/exit timestamps.
//!
//! ## Observability
//! A *tracked states* filter restricts which bits are externally visible. If
//! the filtered diff between old and new masks is empty, no notification
//! fires — neither to the listener stack nor to the bus. The unfiltered mask
//! is still updated, so internal engines always see truth.
//!
//! ## Native mirror
//! `update_native` records the last raw value reported by the radio layer,
//! independent of the cleaned-up abstracted mask. The two disagreeing is how
//! the phantom-link repair detects a stack that misreports its own state.
//!
//! ## Threading
//! Mutations are funneled through the scheduler thread by convention; reads
//! (`is`, `mask`, `native`) are lock-free and safe from any thread.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::events::{Bus, Event, EventKind};

use super::bits::{modified_bits, StateBits};
use super::intent::Intent;

/// One observable state transition, already restricted to tracked bits.
#[derive(Debug, Clone)]
pub struct StateChange<S: StateBits> {
    /// Mask before the transition (tracked bits only).
    pub old: u32,
    /// Mask after the transition (tracked bits only).
    pub new: u32,
    /// Bits among the flipped ones that were explicitly requested.
    pub intent: u32,
    /// Protocol status code accompanying the transition.
    pub status: i32,
    _marker: PhantomData<S>,
}

impl<S: StateBits> StateChange<S> {
    /// Returns `true` if `state` was entered by this transition.
    pub fn did_enter(&self, state: S) -> bool {
        !state.overlaps(self.old) && state.overlaps(self.new)
    }

    /// Returns `true` if `state` was exited by this transition.
    pub fn did_exit(&self, state: S) -> bool {
        state.overlaps(self.old) && !state.overlaps(self.new)
    }

    /// Returns `true` if the flipped `state` bit was explicitly requested.
    pub fn was_intentional(&self, state: S) -> bool {
        state.overlaps(self.intent)
    }
}

/// Listener invoked on observable transitions. Only the top of the listener
/// stack sees events; pushing an ephemeral listener shadows the one below.
pub type StateListener<S> = Arc<dyn Fn(&StateChange<S>) + Send + Sync>;

struct Timing {
    /// While a bit is set: the enter timestamp. While clear: the duration of
    /// the last stay, in milliseconds.
    times: Vec<u64>,
}

/// Bitmask state machine for one endpoint or the manager.
pub struct StateTracker<S: StateBits> {
    mask: AtomicU32,
    native: AtomicU32,
    tracked: AtomicU32,
    timing: Mutex<Timing>,
    listeners: Mutex<Vec<StateListener<S>>>,
    clock: Arc<dyn Clock>,
    bus: Bus,
    /// Endpoint id for bus events; `None` for the manager tracker.
    owner: Option<Arc<str>>,
    _marker: PhantomData<S>,
}

impl<S: StateBits> StateTracker<S> {
    /// Creates a tracker with every state observable.
    pub fn new(clock: Arc<dyn Clock>, bus: Bus, owner: Option<Arc<str>>) -> Self {
        Self::with_tracked(clock, bus, owner, S::full_mask())
    }

    /// Creates a tracker with an explicit tracked-states filter.
    pub fn with_tracked(
        clock: Arc<dyn Clock>,
        bus: Bus,
        owner: Option<Arc<str>>,
        tracked: u32,
    ) -> Self {
        Self {
            mask: AtomicU32::new(0),
            native: AtomicU32::new(0),
            tracked: AtomicU32::new(tracked),
            timing: Mutex::new(Timing {
                times: vec![0; S::COUNT],
            }),
            listeners: Mutex::new(Vec::new()),
            clock,
            bus,
            owner,
            _marker: PhantomData,
        }
    }

    // ---- Queries (lock-free) ----

    /// Returns `true` if `state` is currently set.
    #[inline]
    pub fn is(&self, state: S) -> bool {
        state.overlaps(self.mask.load(Ordering::SeqCst))
    }

    /// Returns `true` if any of the given states is set.
    pub fn is_any(&self, states: &[S]) -> bool {
        let mask = self.mask.load(Ordering::SeqCst);
        states.iter().any(|s| s.overlaps(mask))
    }

    /// Current abstracted mask.
    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask.load(Ordering::SeqCst)
    }

    /// Last raw mask reported by the radio layer.
    #[inline]
    pub fn native(&self) -> u32 {
        self.native.load(Ordering::SeqCst)
    }

    /// Returns `true` if the radio layer's last report had `state` set.
    #[inline]
    pub fn is_native(&self, state: S) -> bool {
        state.overlaps(self.native.load(Ordering::SeqCst))
    }

    /// Current tracked-states filter.
    #[inline]
    pub fn tracked(&self) -> u32 {
        self.tracked.load(Ordering::SeqCst)
    }

    /// Replaces the tracked-states filter, returning the previous one.
    pub fn set_tracked(&self, tracked: u32) -> u32 {
        self.tracked.swap(tracked, Ordering::SeqCst)
    }

    /// How long `state` has currently been set, or the duration of its last
    /// stay if it is clear.
    pub fn time_in_state(&self, state: S) -> Duration {
        let timing = self.timing.lock().expect("tracker timing poisoned");
        let stored = timing.times[state.index()];
        drop(timing);
        let ms = if self.is(state) {
            self.clock.now_ms().saturating_sub(stored)
        } else {
            stored
        };
        Duration::from_millis(ms)
    }

    // ---- Listener stack ----

    /// Replaces the whole listener stack with a single listener.
    pub fn set_listener(&self, listener: StateListener<S>) {
        let mut stack = self.listeners.lock().expect("tracker listeners poisoned");
        stack.clear();
        stack.push(listener);
    }

    /// Pushes an ephemeral listener; it shadows the previous top until popped.
    pub fn push_listener(&self, listener: StateListener<S>) {
        self.listeners
            .lock()
            .expect("tracker listeners poisoned")
            .push(listener);
    }

    /// Pops the top listener. Returns `false` if the stack was empty.
    pub fn pop_listener(&self) -> bool {
        self.listeners
            .lock()
            .expect("tracker listeners poisoned")
            .pop()
            .is_some()
    }

    /// Removes a specific listener wherever it sits in the stack.
    pub fn remove_listener(&self, listener: &StateListener<S>) -> bool {
        let mut stack = self.listeners.lock().expect("tracker listeners poisoned");
        let before = stack.len();
        stack.retain(|l| !Arc::ptr_eq(l, listener));
        stack.len() != before
    }

    // ---- Mutations ----

    /// Sets `state` if it is not already set. A no-op (no event, no duplicate
    /// enter timestamp) when the bit is already present.
    pub fn append(&self, state: S, intent: Intent, status: i32) {
        if state.overlaps(self.mask()) {
            return;
        }
        let candidate = self.mask() | state.bit();
        let intent_mask = match intent {
            Intent::Intentional => state.bit(),
            Intent::Unintentional => 0,
        };
        self.apply(candidate, intent_mask, status);
    }

    /// Clears `state`. A no-op when the bit is already clear.
    pub fn remove(&self, state: S, intent: Intent, status: i32) {
        let candidate = self.mask() & !state.bit();
        let intent_mask = match intent {
            Intent::Intentional => state.bit(),
            Intent::Unintentional => 0,
        };
        self.apply(candidate, intent_mask, status);
    }

    /// Replaces the whole mask from the given assignments (unset states are
    /// cleared).
    pub fn set(&self, intent: Intent, status: i32, assignments: &[(S, bool)]) {
        let candidate = Self::fold(0, assignments);
        self.apply(candidate, intent.mask(), status);
    }

    /// Merges the given assignments into the current mask.
    pub fn update(&self, intent: Intent, status: i32, assignments: &[(S, bool)]) {
        let candidate = Self::fold(self.mask(), assignments);
        self.apply(candidate, intent.mask(), status);
    }

    /// Records the radio layer's own state report. Does not touch the
    /// abstracted mask and fires no notification.
    pub fn update_native(&self, native_mask: u32) {
        self.native.store(native_mask, Ordering::SeqCst);
    }

    fn fold(base: u32, assignments: &[(S, bool)]) -> u32 {
        let mut mask = base;
        for (state, on) in assignments {
            if *on {
                mask |= state.bit();
            } else {
                mask &= !state.bit();
            }
        }
        mask
    }

    /// Applies a candidate mask: diff, stamp durations, narrow the intent mask
    /// to flipped bits, then notify if the tracked diff is non-empty.
    fn apply(&self, candidate: u32, intent_mask: u32, status: i32) {
        let now = self.clock.now_ms();
        let (old, new, intent) = {
            let mut timing = self.timing.lock().expect("tracker timing poisoned");
            let old = self.mask.load(Ordering::SeqCst);
            let new = candidate;
            let mut intent = intent_mask;

            if old == new {
                return;
            }

            for i in 0..S::COUNT {
                let bit = 1u32 << i;
                let was = old & bit != 0;
                let is = new & bit != 0;
                if was && !is {
                    timing.times[i] = now.saturating_sub(timing.times[i]);
                } else if !was && is {
                    timing.times[i] = now;
                } else {
                    intent &= !bit;
                }
            }

            self.mask.store(new, Ordering::SeqCst);
            (old, new, intent)
        };

        self.fire(old, new, intent, status);
    }

    fn fire(&self, old: u32, new: u32, intent: u32, status: i32) {
        let tracked = self.tracked();
        let Some((old_visible, new_visible)) = modified_bits(tracked, old, new) else {
            return;
        };

        let change = StateChange::<S> {
            old: old_visible,
            new: new_visible,
            intent: intent & tracked,
            status,
            _marker: PhantomData,
        };

        let mut ev = Event::new(EventKind::StateChanged)
            .with_masks(change.old, change.new, change.intent)
            .with_status(status);
        if let Some(owner) = &self.owner {
            ev = ev.with_endpoint(owner.clone());
        }
        self.bus.publish(ev);

        let top = {
            let stack = self.listeners.lock().expect("tracker listeners poisoned");
            stack.last().cloned()
        };
        if let Some(listener) = top {
            listener(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::LinkState;
    use std::sync::atomic::AtomicUsize;

    fn tracker(clock: Arc<ManualClock>) -> StateTracker<LinkState> {
        StateTracker::new(clock, Bus::new(64), Some("ep".into()))
    }

    fn counting_listener(count: Arc<AtomicUsize>) -> StateListener<LinkState> {
        Arc::new(move |_change| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_append_then_remove_round_trips_with_two_notifications() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock);
        let count = Arc::new(AtomicUsize::new(0));
        t.set_listener(counting_listener(count.clone()));

        let before = t.mask();
        t.append(LinkState::Connected, Intent::Intentional, 0);
        t.remove(LinkState::Connected, Intent::Intentional, 0);

        assert_eq!(t.mask(), before);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_append_already_set_is_noop() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock.clone());
        let count = Arc::new(AtomicUsize::new(0));

        t.append(LinkState::Bonded, Intent::Intentional, 0);
        let enter = t.timing.lock().unwrap().times[LinkState::Bonded.index()];
        t.set_listener(counting_listener(count.clone()));

        clock.advance(Duration::from_millis(500));
        t.append(LinkState::Bonded, Intent::Intentional, 0);

        assert_eq!(count.load(Ordering::SeqCst), 0, "no event on redundant append");
        let stamp = t.timing.lock().unwrap().times[LinkState::Bonded.index()];
        assert_eq!(stamp, enter, "no duplicate enter timestamp");
    }

    #[test]
    fn test_intent_mask_narrowed_to_flipped_bits() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock);
        t.append(LinkState::Connected, Intent::Unintentional, 0);

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        t.set_listener(Arc::new(move |change: &StateChange<LinkState>| {
            *seen_clone.lock().unwrap() = Some(change.clone());
        }));

        // Connected already set: only Initialized flips, so only its bit may
        // carry intent.
        t.update(
            Intent::Intentional,
            0,
            &[(LinkState::Connected, true), (LinkState::Initialized, true)],
        );

        let change = seen.lock().unwrap().clone().unwrap();
        assert!(change.did_enter(LinkState::Initialized));
        assert!(change.was_intentional(LinkState::Initialized));
        assert!(!change.was_intentional(LinkState::Connected));
    }

    #[test]
    fn test_tracked_filter_suppresses_notification() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = StateTracker::<LinkState>::with_tracked(
            clock,
            Bus::new(64),
            Some("ep".into()),
            LinkState::default_tracked(),
        );
        let count = Arc::new(AtomicUsize::new(0));
        t.set_listener(counting_listener(count.clone()));

        t.append(LinkState::Discovering, Intent::Unintentional, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0, "hidden bit fires nothing");
        assert!(t.is(LinkState::Discovering), "mask still updated");

        t.append(LinkState::Connected, Intent::Unintentional, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_time_in_state_grows_then_freezes() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock.clone());

        t.append(LinkState::Connected, Intent::Intentional, 0);
        clock.advance(Duration::from_millis(300));
        assert_eq!(t.time_in_state(LinkState::Connected).as_millis(), 300);

        clock.advance(Duration::from_millis(200));
        t.remove(LinkState::Connected, Intent::Intentional, 0);
        clock.advance(Duration::from_secs(5));
        assert_eq!(t.time_in_state(LinkState::Connected).as_millis(), 500);
    }

    #[test]
    fn test_native_mirror_is_independent() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock);
        t.append(LinkState::Connected, Intent::Intentional, 0);
        t.update_native(LinkState::Disconnected.bit());

        assert!(t.is(LinkState::Connected));
        assert!(t.is_native(LinkState::Disconnected));
        assert!(!t.is_native(LinkState::Connected));
    }

    #[test]
    fn test_ephemeral_listener_shadows_then_restores() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let t = tracker(clock);
        let base = Arc::new(AtomicUsize::new(0));
        let ephemeral = Arc::new(AtomicUsize::new(0));
        t.set_listener(counting_listener(base.clone()));
        t.push_listener(counting_listener(ephemeral.clone()));

        t.append(LinkState::Connected, Intent::Intentional, 0);
        assert_eq!(base.load(Ordering::SeqCst), 0);
        assert_eq!(ephemeral.load(Ordering::SeqCst), 1);

        assert!(t.pop_listener());
        t.remove(LinkState::Connected, Intent::Intentional, 0);
        assert_eq!(base.load(Ordering::SeqCst), 1);
        assert_eq!(ephemeral.load(Ordering::SeqCst), 1);
    }
}
