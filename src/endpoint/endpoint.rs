//! # Per-endpoint orchestration.
//!
//! An [`Endpoint`] composes the state tracker, the connection-fail engine,
//! the two reconnect sessions, and the phantom-link repair, and builds tasks
//! for every radio operation. It owns no thread: everything here runs on the
//! scheduler thread, entered through manager commands and radio completions.
//!
//! ## Connect pipeline
//! ```text
//! connect() ──► Connect task ──► link open ──► DiscoverAttributes task ──► Initialized
//!                   │                               │
//!                   └── failure ──► fail engine ◄───┘ (charged as a connect failure)
//!                                        │
//!                        retry ──► back through Disconnected ──► new Connect task
//!                        no-retry ──► settle Disconnected (counter frozen)
//! ```
//!
//! Unexpected drops of an established link go to the short-term session
//! first, escalate to the long-term session, and only then settle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::clock::Clock;
use crate::config::Config;
use crate::core::Scheduler;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{
    BondFailEvent, ConnectFailDecision, ConnectFailEvent, ConnectFailPolicy, DisconnectReason,
    FailureKind, PolicySet, ReconnectPolicy, SessionFlavor, Timing,
};
use crate::radio::{
    AttrHandle, EndpointId, LinkPriority, Phy, Radio, RawLinkState, Rejection, Status,
};
use crate::state::{
    ConnectStage, Intent, LinkState, ManagerState, StateBits, StateChange, StateListener,
    StateTracker,
};
use crate::tasks::{
    Exec, OnOutcome, Precondition, Priority, Target, Task, TaskKind, TaskOutcome, TaskState,
};

use super::fail::ConnectionFailManager;
use super::phantom::PhantomLinkFix;
use super::reconnect::{ReconnectSession, SessionEnd, SessionTick};
use super::wake::WakeLock;

/// One connectable entity and its decision engines.
pub struct Endpoint {
    id: EndpointId,
    cfg: Config,
    bus: Bus,
    clock: Arc<dyn Clock>,
    radio: Arc<dyn Radio>,
    scheduler: Arc<Scheduler>,
    manager_tracker: Arc<StateTracker<ManagerState>>,
    wake: Arc<WakeLock>,
    policies: PolicySet,

    tracker: Arc<StateTracker<LinkState>>,
    fail: Mutex<ConnectionFailManager>,
    short_term: Mutex<ReconnectSession>,
    long_term: Mutex<ReconnectSession>,
    phantom: Mutex<PhantomLinkFix>,
    phantom_listener: Mutex<Option<StateListener<LinkState>>>,

    fail_listeners: Mutex<Vec<Arc<dyn ConnectFailPolicy>>>,
    reconnect_override: Mutex<Option<Arc<dyn ReconnectPolicy>>>,

    /// Whether the connect series in flight was explicitly requested; drives
    /// the intent on pipeline state transitions.
    connect_explicit: AtomicBool,
    bond_attempts: AtomicU32,
    /// Attributes whose notifications are currently enabled, for redundancy
    /// short-circuits.
    notify_enabled: Mutex<HashSet<AttrHandle>>,

    weak_self: Weak<Endpoint>,
}

impl Endpoint {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: EndpointId,
        cfg: Config,
        bus: Bus,
        clock: Arc<dyn Clock>,
        radio: Arc<dyn Radio>,
        scheduler: Arc<Scheduler>,
        manager_tracker: Arc<StateTracker<ManagerState>>,
        wake: Arc<WakeLock>,
        policies: PolicySet,
    ) -> Arc<Self> {
        let tracker = Arc::new(StateTracker::with_tracked(
            clock.clone(),
            bus.clone(),
            Some(id.arc()),
            LinkState::default_tracked(),
        ));
        tracker.update(
            Intent::Unintentional,
            Status::NOT_APPLICABLE.0,
            &[(LinkState::Disconnected, true), (LinkState::Unbonded, true)],
        );

        Arc::new_cyclic(|weak| Self {
            fail: Mutex::new(ConnectionFailManager::new(
                id.clone(),
                cfg.history_size_clamped(),
            )),
            short_term: Mutex::new(ReconnectSession::new(id.clone(), SessionFlavor::ShortTerm)),
            long_term: Mutex::new(ReconnectSession::new(id.clone(), SessionFlavor::LongTerm)),
            phantom: Mutex::new(PhantomLinkFix::new()),
            phantom_listener: Mutex::new(None),
            fail_listeners: Mutex::new(Vec::new()),
            reconnect_override: Mutex::new(None),
            connect_explicit: AtomicBool::new(false),
            bond_attempts: AtomicU32::new(0),
            notify_enabled: Mutex::new(HashSet::new()),
            weak_self: weak.clone(),
            id,
            cfg,
            bus,
            clock,
            radio,
            scheduler,
            manager_tracker,
            wake,
            policies,
            tracker,
        })
    }

    // ---- Identity and state queries ----

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn is(&self, state: LinkState) -> bool {
        self.tracker.is(state)
    }

    pub fn state_mask(&self) -> u32 {
        self.tracker.mask()
    }

    pub fn time_in_state(&self, state: LinkState) -> std::time::Duration {
        self.tracker.time_in_state(state)
    }

    /// The radio layer's last raw report, independent of the abstracted mask.
    pub fn is_native(&self, state: LinkState) -> bool {
        self.tracker.is_native(state)
    }

    pub fn connect_fail_count(&self) -> u32 {
        self.fail.lock().expect("fail manager poisoned").fail_count()
    }

    pub fn connect_fail_history(&self) -> Vec<ConnectFailEvent> {
        self.fail.lock().expect("fail manager poisoned").history()
    }

    // ---- Listener / policy configuration ----

    /// Replaces the state-change listener stack with one listener.
    pub fn set_state_listener(&self, listener: StateListener<LinkState>) {
        self.tracker.set_listener(listener);
    }

    /// Pushes an ephemeral state listener shadowing the previous one.
    pub fn push_state_listener(&self, listener: StateListener<LinkState>) {
        self.tracker.push_listener(listener);
    }

    pub fn pop_state_listener(&self) -> bool {
        self.tracker.pop_listener()
    }

    /// Replaces the per-endpoint connect-fail listener stack.
    pub fn set_connect_fail_listener(&self, listener: Arc<dyn ConnectFailPolicy>) {
        let mut stack = self.fail_listeners.lock().expect("listeners poisoned");
        stack.clear();
        stack.push(listener);
    }

    pub fn push_connect_fail_listener(&self, listener: Arc<dyn ConnectFailPolicy>) {
        self.fail_listeners
            .lock()
            .expect("listeners poisoned")
            .push(listener);
    }

    pub fn pop_connect_fail_listener(&self) -> bool {
        self.fail_listeners
            .lock()
            .expect("listeners poisoned")
            .pop()
            .is_some()
    }

    /// Overrides the manager's reconnect policy for this endpoint.
    pub fn set_reconnect_policy(&self, policy: Arc<dyn ReconnectPolicy>) {
        *self.reconnect_override.lock().expect("policy poisoned") = Some(policy);
    }

    // ---- Operations ----

    /// Explicitly connects: resets the fail series and queues a connect task.
    /// Redundant when already fully initialized.
    pub fn connect(&self) {
        self.fail
            .lock()
            .expect("fail manager poisoned")
            .on_explicit_connect(self.clock.now_ms());
        self.start_connect(true, Priority::EXPLICIT_CONNECTING);
    }

    /// Explicitly disconnects: cancels reconnect sessions, withdraws queued
    /// connects, and queues a disconnect task. The arrival sweep softly
    /// cancels in-flight work for this endpoint queued before it.
    pub fn disconnect(&self) {
        self.fail
            .lock()
            .expect("fail manager poisoned")
            .on_explicit_disconnect();
        self.stop_sessions();
        self.tracker.update(
            Intent::Intentional,
            Status::NOT_APPLICABLE.0,
            &[
                (LinkState::Connecting, false),
                (LinkState::RetryingConnection, false),
            ],
        );
        self.scheduler
            .clear_queue_of(TaskKind::Connect, &self.target());

        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Disconnect,
            true,
            Priority::EXPLICIT_CONNECTING,
            false,
            move || {
                if tracker.is(LinkState::Disconnected) && !tracker.is(LinkState::Connected) {
                    Exec::Redundant
                } else {
                    launch(radio.disconnect(&id))
                }
            },
            Some(self.hook(Endpoint::on_disconnect_task_ended)),
        );
    }

    /// Reads an attribute at normal priority.
    pub fn read(&self, attr: AttrHandle, on: Option<OnOutcome>) {
        self.read_with_priority(attr, Priority::NORMAL_READS_WRITES, on);
    }

    pub fn read_with_priority(&self, attr: AttrHandle, priority: Priority, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Read,
            true,
            priority,
            true,
            move || launch(radio.read_attribute(&id, attr)),
            on,
        );
    }

    /// Writes an attribute at normal priority.
    pub fn write(&self, attr: AttrHandle, value: Vec<u8>, on: Option<OnOutcome>) {
        self.write_with_priority(attr, value, Priority::NORMAL_READS_WRITES, on);
    }

    pub fn write_with_priority(
        &self,
        attr: AttrHandle,
        value: Vec<u8>,
        priority: Priority,
        on: Option<OnOutcome>,
    ) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Write,
            true,
            priority,
            true,
            move || launch(radio.write_attribute(&id, attr, &value)),
            on,
        );
    }

    /// Enables or disables notifications for an attribute. Redundant when the
    /// attribute is already in the requested notify state.
    pub fn toggle_notify(&self, attr: AttrHandle, enable: bool, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        let weak = self.weak_self.clone();
        self.spawn_task(
            TaskKind::ToggleNotify,
            true,
            Priority::NORMAL_READS_WRITES,
            true,
            move || {
                let already = weak
                    .upgrade()
                    .map(|ep| ep.notify_is_enabled(attr) == enable)
                    .unwrap_or(false);
                if already {
                    Exec::Redundant
                } else {
                    launch(radio.toggle_notify(&id, attr, enable))
                }
            },
            on,
        );
    }

    fn notify_is_enabled(&self, attr: AttrHandle) -> bool {
        self.notify_enabled
            .lock()
            .expect("notify set poisoned")
            .contains(&attr)
    }

    /// Queues a background signal-strength read; yields to anything more
    /// important.
    pub fn read_signal_strength(&self, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::ReadSignalStrength,
            true,
            Priority::Trivial,
            true,
            move || launch(radio.read_signal_strength(&id)),
            on,
        );
    }

    pub fn negotiate_mtu(&self, mtu: u16, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::NegotiateMtu,
            true,
            Priority::NORMAL_READS_WRITES,
            true,
            move || launch(radio.negotiate_mtu(&id, mtu)),
            on,
        );
    }

    pub fn set_connection_priority(&self, priority: LinkPriority, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::SetConnectionPriority,
            true,
            Priority::NORMAL_READS_WRITES,
            true,
            move || launch(radio.set_connection_priority(&id, priority)),
            on,
        );
    }

    pub fn set_physical_layer(&self, phy: Phy, on: Option<OnOutcome>) {
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::SetPhysicalLayer,
            true,
            Priority::NORMAL_READS_WRITES,
            true,
            move || launch(radio.set_physical_layer(&id, phy)),
            on,
        );
    }

    /// Explicitly bonds. Redundant when already bonded.
    pub fn bond(&self) {
        self.bond_attempts.store(0, Ordering::SeqCst);
        self.bond_internal(true, Priority::EXPLICIT_CONNECTING, None);
    }

    /// Explicitly removes the bond. Redundant when not bonded.
    pub fn unbond(&self) {
        self.tracker.update(
            Intent::Intentional,
            Status::NOT_APPLICABLE.0,
            &[(LinkState::Bonding, false)],
        );
        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Unbond,
            true,
            Priority::EXPLICIT_CONNECTING,
            false,
            move || {
                if tracker.is(LinkState::Unbonded) {
                    Exec::Redundant
                } else {
                    launch(radio.unbond(&id))
                }
            },
            None,
        );
    }

    // ---- Radio teardown (manager-driven) ----

    /// Queues the pre-radio-off teardown disconnect at critical priority, so
    /// it runs before the radio-off task it precedes in the queue.
    pub(crate) fn disconnect_for_radio_off(&self) {
        self.fail
            .lock()
            .expect("fail manager poisoned")
            .on_explicit_disconnect();
        self.stop_sessions();
        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Disconnect,
            true,
            Priority::Critical,
            false,
            move || {
                if tracker.is(LinkState::Disconnected) && !tracker.is(LinkState::Connected) {
                    Exec::Redundant
                } else {
                    launch(radio.disconnect(&id))
                }
            },
            Some(self.hook(Endpoint::on_disconnect_task_ended)),
        );
    }

    /// The radio is gone: every session stops and the endpoint settles.
    pub(crate) fn on_radio_disabled(&self) {
        self.stop_sessions();
        self.tracker.update_native(LinkState::Disconnected.bit());
        self.settle_disconnected(Intent::Unintentional, Status::NOT_APPLICABLE);
    }

    // ---- Radio completions (entered via manager commands) ----

    pub(crate) fn on_radio_connected(&self) {
        self.tracker.update_native(LinkState::Connected.bit());
        let repairing = self.phantom.lock().expect("phantom poisoned").is_fixing();

        let explicit = self
            .scheduler
            .current()
            .filter(|t| t.kind() == TaskKind::Connect && t.endpoint() == Some(&self.id))
            .map(|t| t.is_explicit())
            .unwrap_or_else(|| self.connect_explicit.load(Ordering::SeqCst));
        self.scheduler
            .succeed_current(TaskKind::Connect, &self.target());

        let intent = intent_of(explicit);
        self.tracker.update(
            intent,
            Status::OK.0,
            &[
                (LinkState::Connected, true),
                (LinkState::Disconnected, false),
            ],
        );

        // The phantom repair only wanted the link back; its listener
        // disconnects cleanly, so the pipeline stays out of the way.
        if repairing {
            return;
        }

        // Chain attribute discovery; its failure is charged to this attempt.
        self.tracker
            .append(LinkState::Discovering, intent, Status::NOT_APPLICABLE.0);
        let radio = self.radio.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::DiscoverAttributes,
            false,
            Priority::EXPLICIT_CONNECTING,
            true,
            move || launch(radio.discover_attributes(&id)),
            Some(self.hook(Endpoint::on_discover_task_ended)),
        );
    }

    pub(crate) fn on_radio_connect_failed(&self, status: Status) {
        self.tracker.update_native(LinkState::Disconnected.bit());
        // Resolution routes the failure back through the task's completion
        // hook; a late or duplicate report finds no matching task and stops
        // here.
        self.scheduler
            .fail_current(TaskKind::Connect, &self.target(), status);
    }

    pub(crate) fn on_radio_disconnected(&self, status: Status) {
        self.tracker.update_native(LinkState::Disconnected.bit());
        // Notify subscriptions do not survive the link.
        self.notify_enabled
            .lock()
            .expect("notify set poisoned")
            .clear();

        let explicit = self
            .scheduler
            .current()
            .filter(|t| t.kind() == TaskKind::Disconnect && t.endpoint() == Some(&self.id))
            .map(|t| t.is_explicit())
            .unwrap_or(false);
        if self
            .scheduler
            .succeed_current(TaskKind::Disconnect, &self.target())
        {
            let parked = self
                .fail
                .lock()
                .expect("fail manager poisoned")
                .take_pending_retry();
            self.stop_sessions();
            self.settle_disconnected(intent_of(explicit), status);
            // A retry granted while the link was still up applies once the
            // cleanup disconnect actually lands.
            if !explicit {
                if let Some(decision) = parked {
                    if decision.is_retry() {
                        self.set_disconnected_for_retry(status);
                        self.attempt_reconnect(
                            decision
                                .priority()
                                .unwrap_or(Priority::IMPLICIT_CONNECTING),
                        );
                    }
                }
            }
            return;
        }

        let was_established = self.tracker.is(LinkState::Initialized);
        let was_pipeline =
            self.tracker.is(LinkState::Connecting) || self.tracker.is(LinkState::Connected);

        // The link is gone; an executing operation that needs it should hear
        // the truth now, not at its timeout.
        self.scheduler
            .fail_current_for_connection_loss(&self.id, status);

        if was_established {
            if self.try_start_session(SessionFlavor::ShortTerm, status) {
                self.tracker.update(
                    Intent::Unintentional,
                    status.0,
                    &[
                        (LinkState::Connected, false),
                        (LinkState::Connecting, false),
                        (LinkState::Discovered, false),
                        (LinkState::Initialized, false),
                        (LinkState::ReconnectingShortTerm, true),
                    ],
                );
            } else if self.try_start_session(SessionFlavor::LongTerm, status) {
                self.enter_long_term(status);
            } else {
                self.settle_disconnected(Intent::Unintentional, status);
            }
        } else if was_pipeline {
            // Dropped mid-pipeline: charge the connect attempt. Some stacks
            // report this as a disconnect instead of a connect failure.
            if !self
                .scheduler
                .fail_current(TaskKind::Connect, &self.target(), status)
                && !self
                    .scheduler
                    .fail_current(TaskKind::DiscoverAttributes, &self.target(), status)
            {
                self.settle_disconnected(Intent::Unintentional, status);
            }
        } else {
            self.settle_disconnected(Intent::Unintentional, status);
        }
    }

    pub(crate) fn on_attributes_discovered(&self, status: Status) {
        if status.is_success() {
            if self
                .scheduler
                .succeed_current(TaskKind::DiscoverAttributes, &self.target())
            {
                self.on_fully_initialized();
            }
        } else {
            self.scheduler
                .fail_current(TaskKind::DiscoverAttributes, &self.target(), status);
        }
    }

    pub(crate) fn on_read_completed(&self, status: Status, value: Option<Vec<u8>>) {
        if status.is_success() {
            self.scheduler.resolve_current(
                TaskKind::Read,
                &self.target(),
                TaskState::Succeeded,
                status,
                value,
            );
        } else {
            self.scheduler
                .fail_current(TaskKind::Read, &self.target(), status);
        }
    }

    pub(crate) fn on_notify_toggled(&self, attr: AttrHandle, enabled: bool, status: Status) {
        if status.is_success() {
            {
                let mut set = self.notify_enabled.lock().expect("notify set poisoned");
                if enabled {
                    set.insert(attr);
                } else {
                    set.remove(&attr);
                }
            }
            self.scheduler
                .succeed_current(TaskKind::ToggleNotify, &self.target());
        } else {
            self.scheduler
                .fail_current(TaskKind::ToggleNotify, &self.target(), status);
        }
    }

    pub(crate) fn on_simple_completed(&self, kind: TaskKind, status: Status) {
        if status.is_success() {
            self.scheduler.succeed_current(kind, &self.target());
        } else {
            self.scheduler.fail_current(kind, &self.target(), status);
        }
    }

    pub(crate) fn on_bond_result(&self, status: Status) {
        if status.is_success() {
            let explicit = self
                .scheduler
                .current()
                .filter(|t| t.kind() == TaskKind::Bond && t.endpoint() == Some(&self.id))
                .map(|t| t.is_explicit())
                .unwrap_or(false);
            self.scheduler.succeed_current(TaskKind::Bond, &self.target());
            self.tracker.update(
                intent_of(explicit),
                status.0,
                &[
                    (LinkState::Bonding, false),
                    (LinkState::Bonded, true),
                    (LinkState::Unbonded, false),
                ],
            );
            self.bond_attempts.store(0, Ordering::SeqCst);
            // First bonds are where stacks leave the link open while
            // reporting it closed.
            self.check_phantom_link();
        } else {
            self.scheduler
                .fail_current(TaskKind::Bond, &self.target(), status);
        }
    }

    pub(crate) fn on_unbond_result(&self, status: Status) {
        if status.is_success() {
            self.scheduler
                .succeed_current(TaskKind::Unbond, &self.target());
            self.tracker.update(
                Intent::Unintentional,
                status.0,
                &[
                    (LinkState::Bonded, false),
                    (LinkState::Bonding, false),
                    (LinkState::Unbonded, true),
                ],
            );
        } else {
            self.scheduler
                .fail_current(TaskKind::Unbond, &self.target(), status);
        }
    }

    // ---- Tick ----

    /// Advances reconnect sessions and the phantom repair by one tick.
    pub(crate) fn update(&self, time_step: f64) {
        self.update_session(SessionFlavor::ShortTerm, time_step);
        self.update_session(SessionFlavor::LongTerm, time_step);

        let timed_out = self.phantom.lock().expect("phantom poisoned").update(
            time_step,
            self.cfg.phantom_fix_timeout_opt().map(|d| d.as_secs_f64()),
        );
        if timed_out {
            log::warn!("phantom-link repair timed out for {}", self.id);
            self.restore_after_phantom();
            if !self.tracker.is(LinkState::Disconnected) {
                self.disconnect();
            }
        }
    }

    // ---- Internals: connect pipeline ----

    fn target(&self) -> Target {
        Target::Endpoint(self.id.clone())
    }

    fn start_connect(&self, explicit: bool, priority: Priority) {
        self.connect_explicit.store(explicit, Ordering::SeqCst);
        self.tracker.update(
            intent_of(explicit),
            Status::NOT_APPLICABLE.0,
            &[
                (LinkState::Connecting, true),
                (LinkState::Disconnected, false),
            ],
        );

        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Connect,
            explicit,
            priority,
            false,
            move || {
                if tracker.is(LinkState::Initialized) {
                    Exec::Redundant
                } else {
                    launch(radio.connect(&id))
                }
            },
            Some(self.hook(Endpoint::on_connect_task_ended)),
        );
    }

    fn on_connect_task_ended(&self, outcome: &TaskOutcome) {
        match outcome.state {
            TaskState::Failed => {
                let kind = if outcome.status == Status::INSUFFICIENT_AUTHENTICATION {
                    FailureKind::AuthenticationFailed
                } else {
                    FailureKind::ConnectionFailed
                };
                self.handle_connect_failure(
                    kind,
                    outcome.status,
                    Timing::Eventually,
                    ConnectStage::Connecting,
                );
            }
            TaskState::TimedOut => {
                self.handle_connect_failure(
                    FailureKind::ConnectionFailed,
                    outcome.status,
                    Timing::TimedOut,
                    ConnectStage::Connecting,
                );
            }
            TaskState::FailedImmediately => {
                self.handle_connect_failure(
                    FailureKind::ConnectionFailed,
                    outcome.status,
                    Timing::Immediately,
                    ConnectStage::None,
                );
            }
            TaskState::Cancelled | TaskState::SoftlyCancelled | TaskState::ClearedFromQueue => {
                self.handle_connect_failure(
                    self.cancel_kind(),
                    outcome.status,
                    Timing::NotApplicable,
                    ConnectStage::None,
                );
            }
            _ => {}
        }
    }

    fn on_discover_task_ended(&self, outcome: &TaskOutcome) {
        let timing = match outcome.state {
            TaskState::Failed => Timing::Eventually,
            TaskState::TimedOut => Timing::TimedOut,
            TaskState::FailedImmediately => Timing::Immediately,
            _ => return,
        };
        self.tracker.update(
            Intent::Unintentional,
            outcome.status.0,
            &[(LinkState::Discovering, false)],
        );
        // Clean the half-open link up first, so the cleanup outranks (by
        // ordinal) any retry the fail engine queues next.
        self.spawn_implicit_disconnect();
        self.handle_connect_failure(
            FailureKind::DiscoveryFailed,
            outcome.status,
            timing,
            ConnectStage::Discovering,
        );
    }

    fn on_disconnect_task_ended(&self, outcome: &TaskOutcome) {
        if outcome.is_failure() {
            // The stack would not even close the link; force the abstracted
            // state so the application is not stuck half-connected.
            self.settle_disconnected(Intent::Intentional, outcome.status);
        }
    }

    fn on_fully_initialized(&self) {
        let intent = intent_of(self.connect_explicit.load(Ordering::SeqCst));
        self.tracker.update(
            intent,
            Status::OK.0,
            &[
                (LinkState::Discovering, false),
                (LinkState::Discovered, true),
                (LinkState::Initialized, true),
                (LinkState::Connecting, false),
                (LinkState::RetryingConnection, false),
            ],
        );
        self.fail
            .lock()
            .expect("fail manager poisoned")
            .on_fully_initialized();
        self.stop_sessions();
    }

    /// One failed connect attempt: record it, decide, feed the sessions,
    /// then apply the decision.
    fn handle_connect_failure(
        &self,
        kind: FailureKind,
        status: Status,
        timing: Timing,
        stage: ConnectStage,
    ) {
        let now = self.clock.now_ms();
        let short_running = self.session(SessionFlavor::ShortTerm, |s| s.is_running());
        let long_running = self.session(SessionFlavor::LongTerm, |s| s.is_running());

        let reason = DisconnectReason {
            kind,
            status,
            timing,
            stage,
            during_long_term_reconnect: long_running,
        };

        // A canceled attempt is administrative: always do-not-retry, never
        // charged against the counter, the history, or a session.
        if reason.kind.is_canceled() {
            let attempt = self.fail.lock().expect("fail manager poisoned").fail_count();
            self.bus.publish(
                Event::new(EventKind::ConnectFailed)
                    .with_endpoint(self.id.arc())
                    .with_attempt(attempt)
                    .with_status(status.0)
                    .with_reason(reason.kind.label()),
            );
            if !self.tracker.is(LinkState::Connected) {
                self.settle_disconnected(Intent::Unintentional, status);
            }
            return;
        }

        let (event, tried_long_term) = {
            let mut fail = self.fail.lock().expect("fail manager poisoned");
            let event = fail.record_failure(&reason, now);
            (event, fail.tried_long_term())
        };

        self.bus.publish(
            Event::new(EventKind::ConnectFailed)
                .with_endpoint(self.id.arc())
                .with_attempt(event.attempt)
                .with_status(status.0)
                .with_reason(reason.kind.label()),
        );

        let decision = if short_running || long_running || tried_long_term {
            // A running session owns the retry pacing; a spent long-term
            // session means we already gave up.
            ConnectFailDecision::DoNotRetry
        } else {
            self.resolve_fail_decision(&event)
        };

        self.feed_session_failure(SessionFlavor::ShortTerm);
        self.feed_session_failure(SessionFlavor::LongTerm);

        let session_active = self.session(SessionFlavor::ShortTerm, |s| s.is_running())
            || self.session(SessionFlavor::LongTerm, |s| s.is_running());
        if session_active {
            // Attempt over; the session's next tick schedules the retry.
            self.tracker.update(
                Intent::Unintentional,
                status.0,
                &[(LinkState::Connecting, false)],
            );
            return;
        }

        if decision.is_retry() && !self.tracker.is(LinkState::Connected) {
            self.set_disconnected_for_retry(status);
            self.attempt_reconnect(
                decision
                    .priority()
                    .unwrap_or(Priority::IMPLICIT_CONNECTING),
            );
        } else {
            if self.tracker.is(LinkState::Connected) {
                // Cannot apply a retry while the link is up; park it.
                self.fail
                    .lock()
                    .expect("fail manager poisoned")
                    .set_pending_retry(decision);
            }
            self.settle_disconnected(Intent::Unintentional, status);
        }
    }

    fn resolve_fail_decision(&self, event: &ConnectFailEvent) -> ConnectFailDecision {
        let listener = self
            .fail_listeners
            .lock()
            .expect("listeners poisoned")
            .last()
            .cloned();
        let decision = match listener {
            Some(listener) => listener
                .on_connect_failed(event)
                .or_else(|| self.policies.connect_fail.on_connect_failed(event)),
            None => self.policies.connect_fail.on_connect_failed(event),
        };
        decision.unwrap_or(ConnectFailDecision::DoNotRetry)
    }

    fn cancel_kind(&self) -> FailureKind {
        if self
            .manager_tracker
            .is_any(&[ManagerState::TurningOff, ManagerState::Off])
        {
            FailureKind::CanceledFromRadioOff
        } else {
            FailureKind::CanceledFromDisconnect
        }
    }

    fn set_disconnected_for_retry(&self, status: Status) {
        self.tracker.update(
            Intent::Unintentional,
            status.0,
            &[
                (LinkState::Disconnected, true),
                (LinkState::Connecting, false),
                (LinkState::Connected, false),
                (LinkState::Discovering, false),
                (LinkState::Discovered, false),
                (LinkState::Initialized, false),
                (
                    LinkState::RetryingConnection,
                    self.cfg.retry_connect_overall,
                ),
            ],
        );
    }

    fn settle_disconnected(&self, intent: Intent, status: Status) {
        self.tracker.update(
            intent,
            status.0,
            &[
                (LinkState::Disconnected, true),
                (LinkState::Connecting, false),
                (LinkState::Connected, false),
                (LinkState::Discovering, false),
                (LinkState::Discovered, false),
                (LinkState::Initialized, false),
                (LinkState::ReconnectingShortTerm, false),
                (LinkState::ReconnectingLongTerm, false),
                (LinkState::RetryingConnection, false),
            ],
        );
    }

    fn attempt_reconnect(&self, priority: Priority) {
        if self.tracker.is(LinkState::Connecting) {
            return;
        }
        self.start_connect(false, priority);
    }

    fn spawn_implicit_disconnect(&self) {
        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Disconnect,
            false,
            Priority::IMPLICIT_CONNECTING,
            false,
            move || {
                if tracker.is(LinkState::Disconnected) && !tracker.is(LinkState::Connected) {
                    Exec::Redundant
                } else {
                    launch(radio.disconnect(&id))
                }
            },
            None,
        );
    }

    // ---- Internals: reconnect sessions ----

    fn session<R>(&self, flavor: SessionFlavor, f: impl FnOnce(&mut ReconnectSession) -> R) -> R {
        let mutex = match flavor {
            SessionFlavor::ShortTerm => &self.short_term,
            SessionFlavor::LongTerm => &self.long_term,
        };
        f(&mut mutex.lock().expect("session poisoned"))
    }

    fn reconnect_policy(&self) -> Arc<dyn ReconnectPolicy> {
        self.reconnect_override
            .lock()
            .expect("policy poisoned")
            .clone()
            .unwrap_or_else(|| self.policies.reconnect.clone())
    }

    fn try_start_session(&self, flavor: SessionFlavor, drop_status: Status) -> bool {
        let policy = self.reconnect_policy();
        let (started, newly) = self.session(flavor, |s| {
            let was = s.is_running();
            let started = s.attempt_start(drop_status, policy.as_ref());
            (started, started && !was)
        });
        if newly {
            self.wake.push();
        }
        started
    }

    fn feed_session_failure(&self, flavor: SessionFlavor) {
        let policy = self.reconnect_policy();
        let (ended, orig) = self.session(flavor, |s| {
            if !s.is_running() {
                return (None, Status::NOT_APPLICABLE);
            }
            let orig = s.original_drop_status();
            (s.on_connect_failed(policy.as_ref()), orig)
        });
        if let Some(end) = ended {
            self.handle_session_end(flavor, end, orig);
        }
    }

    fn update_session(&self, flavor: SessionFlavor, time_step: f64) {
        let policy = self.reconnect_policy();
        let connecting = self.tracker.is(LinkState::Connecting);
        let (tick, orig) = self.session(flavor, |s| {
            let orig = s.original_drop_status();
            (s.update(time_step, connecting, policy.as_ref()), orig)
        });

        match tick {
            SessionTick::Idle => {}
            SessionTick::Attempt { attempt, delay } => {
                self.bus.publish(
                    Event::new(EventKind::ReconnectAttempt)
                        .with_endpoint(self.id.arc())
                        .with_attempt(attempt)
                        .with_delay(delay)
                        .with_reason(flavor.label()),
                );
                self.attempt_reconnect(Priority::IMPLICIT_CONNECTING);
            }
            SessionTick::Ended(end) => self.handle_session_end(flavor, end, orig),
        }
    }

    fn handle_session_end(&self, flavor: SessionFlavor, end: SessionEnd, orig_status: Status) {
        self.wake.pop();
        log::info!(
            "{} reconnect session for {} ended: {end:?}",
            flavor.label(),
            self.id
        );
        match flavor {
            SessionFlavor::ShortTerm => {
                self.tracker.update(
                    Intent::Unintentional,
                    orig_status.0,
                    &[(LinkState::ReconnectingShortTerm, false)],
                );
                if self.try_start_session(SessionFlavor::LongTerm, orig_status) {
                    self.enter_long_term(orig_status);
                } else {
                    self.settle_disconnected(Intent::Unintentional, orig_status);
                }
            }
            SessionFlavor::LongTerm => {
                self.fail
                    .lock()
                    .expect("fail manager poisoned")
                    .on_long_term_timed_out();
                self.settle_disconnected(Intent::Unintentional, orig_status);
            }
        }
    }

    fn enter_long_term(&self, status: Status) {
        self.tracker.update(
            Intent::Unintentional,
            status.0,
            &[
                (LinkState::Disconnected, true),
                (LinkState::Connected, false),
                (LinkState::Connecting, false),
                (LinkState::Discovered, false),
                (LinkState::Initialized, false),
                (LinkState::ReconnectingLongTerm, true),
            ],
        );
    }

    fn stop_sessions(&self) {
        for flavor in [SessionFlavor::ShortTerm, SessionFlavor::LongTerm] {
            if self.session(flavor, |s| s.cancel()) {
                self.wake.pop();
            }
        }
        self.tracker.update(
            Intent::Unintentional,
            Status::NOT_APPLICABLE.0,
            &[
                (LinkState::ReconnectingShortTerm, false),
                (LinkState::ReconnectingLongTerm, false),
            ],
        );
    }

    // ---- Internals: bonding and phantom repair ----

    fn bond_internal(&self, explicit: bool, priority: Priority, notify: Option<OnOutcome>) {
        self.tracker.update(
            intent_of(explicit),
            Status::NOT_APPLICABLE.0,
            &[(LinkState::Bonding, true), (LinkState::Unbonded, false)],
        );
        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Bond,
            explicit,
            priority,
            false,
            move || {
                if tracker.is(LinkState::Bonded) {
                    Exec::Redundant
                } else {
                    launch(radio.bond(&id))
                }
            },
            Some(notify.unwrap_or_else(|| self.hook(Endpoint::on_bond_task_ended))),
        );
    }

    fn on_bond_task_ended(&self, outcome: &TaskOutcome) {
        match outcome.state {
            TaskState::Failed | TaskState::TimedOut | TaskState::FailedImmediately => {
                self.tracker.update(
                    Intent::Unintentional,
                    outcome.status.0,
                    &[(LinkState::Bonding, false)],
                );
                let attempt = self.bond_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let retry = self.policies.bond.should_retry(&BondFailEvent {
                    endpoint: self.id.clone(),
                    attempt,
                    status: outcome.status,
                });
                if retry {
                    self.bond_internal(false, Priority::IMPLICIT_CONNECTING, None);
                }
            }
            TaskState::Cancelled | TaskState::SoftlyCancelled | TaskState::ClearedFromQueue => {
                self.tracker.update(
                    Intent::Unintentional,
                    Status::NOT_APPLICABLE.0,
                    &[(LinkState::Bonding, false)],
                );
            }
            _ => {}
        }
    }

    /// Detects the stack misreporting an open link as closed and repairs it
    /// with an unbond → rebond → reconnect cycle through the ordinary queue.
    /// Unrelated queued tasks for this endpoint are left alone.
    pub(crate) fn check_phantom_link(&self) {
        if !self.cfg.phantom_fix_enabled {
            return;
        }
        if self.tracker.is(LinkState::Connected) {
            return;
        }
        if self.radio.raw_link_state(&self.id) != RawLinkState::Connected {
            return;
        }

        let saved = self.tracker.tracked();
        if !self.phantom.lock().expect("phantom poisoned").begin(saved) {
            return;
        }
        self.bus.publish(
            Event::new(EventKind::StackTrouble)
                .with_endpoint(self.id.arc())
                .with_reason("link reported closed but provably still open"),
        );
        // Widen observability for the duration of the repair, and watch for
        // the link coming back.
        self.tracker.set_tracked(LinkState::full_mask());
        let weak = self.weak_self.clone();
        let listener: StateListener<LinkState> = Arc::new(move |change: &StateChange<LinkState>| {
            if change.did_enter(LinkState::Connected) {
                if let Some(ep) = weak.upgrade() {
                    ep.on_phantom_reconnected();
                }
            }
        });
        *self
            .phantom_listener
            .lock()
            .expect("phantom listener poisoned") = Some(listener.clone());
        self.tracker.push_listener(listener);

        let radio = self.radio.clone();
        let tracker = self.tracker.clone();
        let id = self.id.clone();
        self.spawn_task(
            TaskKind::Unbond,
            false,
            Priority::IMPLICIT_CONNECTING,
            false,
            move || {
                if tracker.is(LinkState::Unbonded) {
                    Exec::Redundant
                } else {
                    launch(radio.unbond(&id))
                }
            },
            Some(self.hook(Endpoint::on_phantom_unbond_ended)),
        );
    }

    fn on_phantom_unbond_ended(&self, outcome: &TaskOutcome) {
        let success = matches!(outcome.state, TaskState::Succeeded | TaskState::Redundant);
        let proceed = self
            .phantom
            .lock()
            .expect("phantom poisoned")
            .on_unbond_done(success);
        if proceed {
            self.bond_internal(
                false,
                Priority::IMPLICIT_CONNECTING,
                Some(self.hook(Endpoint::on_phantom_bond_ended)),
            );
        } else if !self.phantom.lock().expect("phantom poisoned").is_fixing() {
            self.restore_after_phantom();
        }
    }

    fn on_phantom_bond_ended(&self, outcome: &TaskOutcome) {
        let success = matches!(outcome.state, TaskState::Succeeded | TaskState::Redundant);
        let proceed = self
            .phantom
            .lock()
            .expect("phantom poisoned")
            .on_bond_done(success);
        if proceed {
            self.attempt_reconnect(Priority::IMPLICIT_CONNECTING);
        } else if !self.phantom.lock().expect("phantom poisoned").is_fixing() {
            log::warn!("could not re-bond {} during phantom-link repair", self.id);
            self.restore_after_phantom();
        }
    }

    fn on_phantom_reconnected(&self) {
        if self
            .phantom
            .lock()
            .expect("phantom poisoned")
            .on_reconnected()
        {
            self.disconnect();
            self.restore_after_phantom();
        }
    }

    fn restore_after_phantom(&self) {
        if let Some(saved) = self
            .phantom
            .lock()
            .expect("phantom poisoned")
            .take_saved_tracked()
        {
            self.tracker.set_tracked(saved);
        }
        if let Some(listener) = self
            .phantom_listener
            .lock()
            .expect("phantom listener poisoned")
            .take()
        {
            self.tracker.remove_listener(&listener);
        }
    }

    // ---- Internals: task construction ----

    fn spawn_task(
        &self,
        kind: TaskKind,
        explicit: bool,
        priority: Priority,
        needs_connection: bool,
        op: impl Fn() -> Exec + Send + Sync + 'static,
        notify: Option<OnOutcome>,
    ) {
        let mut builder = Task::builder(kind, self.target())
            .explicit(explicit)
            .priority(priority)
            .precondition(Precondition::state_set(
                "radio-on",
                &self.manager_tracker,
                ManagerState::On,
            ))
            .operation(op);
        if needs_connection {
            builder = builder.precondition(Precondition::state_set(
                "connected",
                &self.tracker,
                LinkState::Connected,
            ));
        }
        if let Some(notify) = notify {
            builder = builder.on_outcome(notify);
        }
        self.scheduler
            .add(builder.build(self.bus.clone(), self.clock.now_ms()));
    }

    /// Wraps a method into a completion hook holding only a weak reference.
    fn hook(&self, f: impl Fn(&Endpoint, &TaskOutcome) + Send + Sync + 'static) -> OnOutcome {
        let weak = self.weak_self.clone();
        Arc::new(move |outcome: &TaskOutcome| {
            if let Some(endpoint) = weak.upgrade() {
                f(&endpoint, outcome);
            }
        })
    }
}

#[inline]
fn intent_of(explicit: bool) -> Intent {
    if explicit {
        Intent::Intentional
    } else {
        Intent::Unintentional
    }
}

#[inline]
fn launch(result: Result<(), Rejection>) -> Exec {
    match result {
        Ok(()) => Exec::Launched,
        Err(rejection) => Exec::Reject(rejection),
    }
}
