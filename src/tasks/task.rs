//! # The task object.
//!
//! A [`Task`] is one scheduled operation against an endpoint or the manager:
//! a kind tag, a target, a priority, composable executability preconditions,
//! and an operation closure that fires the actual radio call. The queue owns
//! the task while it is pending/current; once an ending state is reported,
//! attention passes back to the requester through the optional completion
//! callback and the bus.
//!
//! ## Integrity
//! State transitions are validated. A violation (ending an already-ended
//! task, skipping states) is reported as a diagnostic — `log::error!` plus a
//! [`EventKind::StackTrouble`] event — and otherwise ignored, so one
//! endpoint's bug cannot crash the scheduler for unrelated endpoints.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::radio::{EndpointId, Rejection, Status};
use crate::state::{StateBits, StateTracker};

use super::kind::TaskKind;
use super::priority::Priority;
use super::state::TaskState;

/// Sentinel for "not yet added to the queue".
const ORDINAL_UNASSIGNED: u64 = u64::MAX;

/// What the task is scheduled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The manager itself (radio toggles).
    Manager,
    /// One endpoint.
    Endpoint(EndpointId),
}

impl Target {
    /// The endpoint, if this target is one.
    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            Target::Manager => None,
            Target::Endpoint(id) => Some(id),
        }
    }
}

/// Result of invoking a task's operation closure.
pub enum Exec {
    /// The radio call is in flight; a completion will resolve the task.
    Launched,
    /// The requested condition already holds; nothing was sent.
    Redundant,
    /// The radio refused synchronously; nothing is in flight.
    Reject(Rejection),
}

/// Operation closure fired when the task executes.
pub type Operation = Arc<dyn Fn() -> Exec + Send + Sync>;

/// Completion callback invoked once when the task reaches an ending state.
pub type OnOutcome = Arc<dyn Fn(&TaskOutcome) + Send + Sync>;

/// Executability precondition, re-checked every tick while the task is
/// current. Failing resolves the task `FailedImmediately` with no radio call.
#[derive(Clone)]
pub struct Precondition {
    label: &'static str,
    check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Precondition {
    pub fn new(label: &'static str, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            label,
            check: Arc::new(check),
        }
    }

    /// Holds while the given tracker has `state` set.
    pub fn state_set<S: StateBits>(
        label: &'static str,
        tracker: &Arc<StateTracker<S>>,
        state: S,
    ) -> Self {
        let tracker = tracker.clone();
        Self::new(label, move || tracker.is(state))
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn holds(&self) -> bool {
        (self.check)()
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Precondition({})", self.label)
    }
}

/// Snapshot handed to the requester and to policies when a task ends.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub kind: TaskKind,
    pub target: Target,
    /// The ending state reached.
    pub state: TaskState,
    /// Protocol status preserved for diagnostics.
    pub status: Status,
    /// Whether the task was requested explicitly by the application.
    pub explicit: bool,
    /// Payload carried by the completion (read data).
    pub payload: Option<Vec<u8>>,
}

impl TaskOutcome {
    /// `true` only for [`TaskState::Succeeded`].
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// True operation failures. Administrative endings are excluded so retry
    /// policies never charge them against budgets.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.state,
            TaskState::Failed | TaskState::FailedImmediately | TaskState::TimedOut
        )
    }

    /// Already-in-target-state, superseded, or explicitly withdrawn.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self.state,
            TaskState::Cancelled
                | TaskState::SoftlyCancelled
                | TaskState::ClearedFromQueue
                | TaskState::Redundant
        )
    }

    /// The failure as a typed error, when this outcome is one.
    pub fn error(&self) -> Option<TaskError> {
        match self.state {
            TaskState::Failed => Some(TaskError::Protocol {
                status: self.status,
            }),
            TaskState::FailedImmediately => Some(TaskError::Rejected {
                reason: format!("status {}", self.status),
            }),
            TaskState::TimedOut => Some(TaskError::Timeout {
                timeout: Duration::ZERO,
            }),
            _ => None,
        }
    }
}

struct TaskInner {
    state: TaskState,
    timeout: Option<Duration>,
    created_ms: u64,
    executed_ms: u64,
    execute_start_ms: u64,
    armed_executing_secs: f64,
    /// Scheduler update count at arm time; execution waits one full tick.
    armed_at_update: u64,
    status: Status,
    payload: Option<Vec<u8>>,
    reported: bool,
}

/// One scheduled operation. Shared as `Arc<Task>`; the scheduler mutates it,
/// everyone else observes.
pub struct Task {
    kind: TaskKind,
    target: Target,
    priority: Priority,
    explicit: bool,
    preconditions: Vec<Precondition>,
    op: Operation,
    timeout_override: Option<Duration>,
    notify: Option<OnOutcome>,
    bus: Bus,
    soft_cancelled: AtomicBool,
    ordinal: AtomicU64,
    inner: Mutex<TaskInner>,
}

impl Task {
    /// Starts building a task of the given kind and target.
    pub fn builder(kind: TaskKind, target: Target) -> TaskBuilder {
        TaskBuilder {
            kind,
            target,
            priority: kind.default_priority(),
            explicit: false,
            preconditions: Vec::new(),
            op: None,
            timeout_override: None,
            notify: None,
        }
    }

    // ---- Identity ----

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn endpoint(&self) -> Option<&EndpointId> {
        self.target.endpoint()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Insertion ordinal; ties between equal priorities break FIFO on it.
    pub fn ordinal(&self) -> u64 {
        self.ordinal.load(Ordering::SeqCst)
    }

    pub(crate) fn assign_ordinal(&self, ordinal: u64) {
        let _ = self.ordinal.compare_exchange(
            ORDINAL_UNASSIGNED,
            ordinal,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    // ---- State ----

    pub fn state(&self) -> TaskState {
        self.inner.lock().expect("task poisoned").state
    }

    pub fn is_ended(&self) -> bool {
        self.state().is_ending()
    }

    /// Status attached by the resolution path, for diagnostics.
    pub fn status(&self) -> Status {
        self.inner.lock().expect("task poisoned").status
    }

    pub fn was_soft_cancelled(&self) -> bool {
        self.soft_cancelled.load(Ordering::SeqCst)
    }

    /// Marks the task for cooperative cancellation. The task keeps running
    /// its current radio call; the eventual ending state is reinterpreted as
    /// [`TaskState::SoftlyCancelled`].
    pub(crate) fn mark_soft_cancelled(&self) {
        self.soft_cancelled.store(true, Ordering::SeqCst);
    }

    /// Transitions `Created → Initialized`. Re-queued (interrupted) tasks skip
    /// this.
    pub(crate) fn init(&self) {
        let mut inner = self.inner.lock().expect("task poisoned");
        if inner.state == TaskState::Created {
            self.transition(&mut inner, TaskState::Initialized);
        }
    }

    /// Transitions into `Queued` (from `Initialized` or `Interrupted`).
    pub(crate) fn mark_queued(&self) {
        let mut inner = self.inner.lock().expect("task poisoned");
        match inner.state {
            TaskState::Initialized | TaskState::Interrupted => {
                self.transition(&mut inner, TaskState::Queued);
            }
            other => self.fault(&format!("queued from {}", other.label())),
        }
    }

    /// Arms the task: resets the armed/executing accumulator, stamps the
    /// execute-start reference, and resolves the effective timeout.
    pub(crate) fn arm(&self, update_count: u64, timeout: Duration, now_ms: u64) {
        let mut inner = self.inner.lock().expect("task poisoned");
        if inner.state != TaskState::Queued {
            self.fault(&format!("armed from {}", inner.state.label()));
            return;
        }
        inner.armed_executing_secs = 0.0;
        inner.armed_at_update = update_count;
        inner.execute_start_ms = now_ms;
        inner.timeout = self
            .timeout_override
            .or(if timeout == Duration::ZERO {
                None
            } else {
                Some(timeout)
            });
        self.transition(&mut inner, TaskState::Armed);
    }

    /// A task must survive one full tick armed before it may execute.
    pub(crate) fn armed_long_enough(&self, update_count: u64) -> bool {
        let inner = self.inner.lock().expect("task poisoned");
        inner.state == TaskState::Armed && update_count > inner.armed_at_update
    }

    /// Transitions `Armed → Executing` and stamps execution start.
    pub(crate) fn begin_executing(&self, now_ms: u64) {
        let mut inner = self.inner.lock().expect("task poisoned");
        if inner.state != TaskState::Armed {
            self.fault(&format!("executing from {}", inner.state.label()));
            return;
        }
        inner.execute_start_ms = now_ms;
        inner.executed_ms = now_ms;
        self.transition(&mut inner, TaskState::Executing);
    }

    /// Invokes the operation closure.
    pub(crate) fn execute(&self) -> Exec {
        (self.op)()
    }

    /// Advances the armed/executing accumulator by one tick.
    pub(crate) fn tick(&self, time_step: f64) {
        let mut inner = self.inner.lock().expect("task poisoned");
        if matches!(inner.state, TaskState::Armed | TaskState::Executing) {
            inner.armed_executing_secs += time_step;
        }
    }

    /// Checked once per tick while executing; resolution is bounded by the
    /// tick period.
    pub(crate) fn timed_out(&self, now_ms: u64) -> bool {
        let inner = self.inner.lock().expect("task poisoned");
        if inner.state != TaskState::Executing {
            return false;
        }
        match inner.timeout {
            None => false,
            Some(timeout) => {
                now_ms.saturating_sub(inner.execute_start_ms) >= timeout.as_millis() as u64
            }
        }
    }

    /// The effective timeout resolved at arm time.
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.lock().expect("task poisoned").timeout
    }

    /// Total time spent armed and executing, in seconds.
    pub fn time_armed_and_executing(&self) -> f64 {
        self.inner.lock().expect("task poisoned").armed_executing_secs
    }

    /// Creation timestamp (milliseconds).
    pub fn created_at_ms(&self) -> u64 {
        self.inner.lock().expect("task poisoned").created_ms
    }

    /// Execution-start timestamp (milliseconds); zero until first executed.
    pub fn executed_at_ms(&self) -> u64 {
        self.inner.lock().expect("task poisoned").executed_ms
    }

    /// Re-opens an interrupted task for another round through the queue: the
    /// eventual real ending must be reported to the requester, the
    /// interruption was not it.
    pub(crate) fn prepare_requeue(&self) {
        self.inner.lock().expect("task poisoned").reported = false;
    }

    // ---- Preconditions ----

    /// First failing precondition's label, if any.
    pub(crate) fn failing_precondition(&self) -> Option<&'static str> {
        self.preconditions
            .iter()
            .find(|p| !p.holds())
            .map(|p| p.label())
    }

    // ---- Ending ----

    /// Attaches the completion payload before resolution (read data).
    pub(crate) fn attach_payload(&self, payload: Vec<u8>) {
        self.inner.lock().expect("task poisoned").payload = Some(payload);
    }

    /// Moves the task into an ending state.
    ///
    /// A pending soft-cancel overrides whatever ending was requested with
    /// [`TaskState::SoftlyCancelled`] — the one allowed override, preventing a
    /// stale success from being reported after a superseding operation.
    ///
    /// Returns the outcome exactly once; repeated resolution attempts return
    /// `None` (a duplicate with the same state is tolerated silently, anything
    /// else is reported as a diagnostic).
    pub(crate) fn set_ending_state(
        &self,
        ending: TaskState,
        status: Status,
    ) -> Option<TaskOutcome> {
        let ending = if self.was_soft_cancelled() {
            TaskState::SoftlyCancelled
        } else {
            ending
        };

        let mut inner = self.inner.lock().expect("task poisoned");
        if !ending.is_ending() {
            self.fault(&format!("{} is not an ending state", ending.label()));
            return None;
        }
        if inner.state == ending {
            // Duplicate completions happen (late callbacks); tolerated.
            return None;
        }
        if inner.state.is_ending() {
            self.fault(&format!(
                "already ended as {}, refusing {}",
                inner.state.label(),
                ending.label()
            ));
            return None;
        }

        inner.status = status;
        self.transition(&mut inner, ending);

        if inner.reported {
            return None;
        }
        inner.reported = true;
        Some(TaskOutcome {
            kind: self.kind,
            target: self.target.clone(),
            state: ending,
            status,
            explicit: self.explicit,
            payload: inner.payload.take(),
        })
    }

    /// Invokes the requester's completion callback, if one was attached.
    pub(crate) fn report(&self, outcome: &TaskOutcome) {
        if let Some(notify) = &self.notify {
            notify(outcome);
        }
    }

    // ---- Internals ----

    // Holds the inner lock: must not go through Display (which locks too).
    fn transition(&self, inner: &mut TaskInner, new: TaskState) {
        if inner.state == new {
            return;
        }
        inner.state = new;

        if new.is_ending() {
            log::debug!(
                "task ended: {}({}) status {}",
                self.kind.label(),
                new.label(),
                inner.status,
            );
        }

        let mut ev = Event::new(EventKind::TaskStateChanged)
            .with_task(self.kind.label())
            .with_task_state(new.label());
        if let Some(ep) = self.endpoint() {
            ev = ev.with_endpoint(ep.arc());
        }
        if new.is_ending() && inner.status.is_applicable() {
            ev = ev.with_status(inner.status.0);
        }
        self.bus.publish(ev);
    }

    // Holds the inner lock: must not go through Display (which locks too).
    fn fault(&self, detail: &str) {
        log::error!(
            "task integrity violation: {} #{}: {detail}",
            self.kind.label(),
            self.ordinal()
        );
        let mut ev = Event::new(EventKind::StackTrouble)
            .with_task(self.kind.label())
            .with_reason(format!("task integrity violation: {detail}"));
        if let Some(ep) = self.endpoint() {
            ev = ev.with_endpoint(ep.arc());
        }
        self.bus.publish(ev);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        match self.endpoint() {
            Some(ep) => write!(
                f,
                "{}({} {} #{})",
                self.kind.label(),
                state.label(),
                ep,
                self.ordinal()
            ),
            None => write!(
                f,
                "{}({} #{})",
                self.kind.label(),
                state.label(),
                self.ordinal()
            ),
        }
    }
}

/// Builder for [`Task`].
pub struct TaskBuilder {
    kind: TaskKind,
    target: Target,
    priority: Priority,
    explicit: bool,
    preconditions: Vec<Precondition>,
    op: Option<Operation>,
    timeout_override: Option<Duration>,
    notify: Option<OnOutcome>,
}

impl TaskBuilder {
    /// Overrides the kind's default priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the task as explicitly requested by the application.
    pub fn explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    /// Attaches an executability precondition.
    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Sets the operation closure fired on execution.
    pub fn operation(mut self, op: impl Fn() -> Exec + Send + Sync + 'static) -> Self {
        self.op = Some(Arc::new(op));
        self
    }

    /// Overrides the timeout-policy duration for this task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Attaches a completion callback invoked once on any ending state.
    pub fn on_outcome(mut self, notify: OnOutcome) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Builds the task. A task without an operation resolves `Redundant` on
    /// execution.
    pub fn build(self, bus: Bus, now_ms: u64) -> Arc<Task> {
        Arc::new(Task {
            kind: self.kind,
            target: self.target,
            priority: self.priority,
            explicit: self.explicit,
            preconditions: self.preconditions,
            op: self.op.unwrap_or_else(|| Arc::new(|| Exec::Redundant)),
            timeout_override: self.timeout_override,
            notify: self.notify,
            bus,
            soft_cancelled: AtomicBool::new(false),
            ordinal: AtomicU64::new(ORDINAL_UNASSIGNED),
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                timeout: None,
                created_ms: now_ms,
                executed_ms: 0,
                execute_start_ms: 0,
                armed_executing_secs: 0.0,
                armed_at_update: 0,
                status: Status::NOT_APPLICABLE,
                payload: None,
                reported: false,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Bus {
        Bus::new(64)
    }

    fn simple_task(kind: TaskKind) -> Arc<Task> {
        Task::builder(kind, Target::Endpoint(EndpointId::new("ep")))
            .operation(|| Exec::Launched)
            .build(bus(), 0)
    }

    fn drive_to_executing(task: &Arc<Task>) {
        task.init();
        task.mark_queued();
        task.arm(0, Duration::from_secs(5), 0);
        task.begin_executing(10);
    }

    #[test]
    fn test_lifecycle_reaches_succeeded() {
        let task = simple_task(TaskKind::Read);
        drive_to_executing(&task);
        let outcome = task.set_ending_state(TaskState::Succeeded, Status::OK);
        assert!(outcome.unwrap().succeeded());
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[test]
    fn test_ending_state_is_immutable() {
        let task = simple_task(TaskKind::Read);
        drive_to_executing(&task);
        task.set_ending_state(TaskState::Succeeded, Status::OK);

        // A different ending is refused and reported, the state stands.
        assert!(task
            .set_ending_state(TaskState::Failed, Status::CONNECTION_TIMEOUT)
            .is_none());
        assert_eq!(task.state(), TaskState::Succeeded);

        // A duplicate of the same ending is tolerated silently.
        assert!(task.set_ending_state(TaskState::Succeeded, Status::OK).is_none());
    }

    #[test]
    fn test_soft_cancel_overrides_would_be_success() {
        let task = simple_task(TaskKind::Read);
        drive_to_executing(&task);
        task.mark_soft_cancelled();

        let outcome = task.set_ending_state(TaskState::Succeeded, Status::OK).unwrap();
        assert_eq!(outcome.state, TaskState::SoftlyCancelled);
        assert!(outcome.is_administrative());
        assert!(!outcome.is_failure());
    }

    #[test]
    fn test_armed_gate_requires_one_full_tick() {
        let task = simple_task(TaskKind::Read);
        task.init();
        task.mark_queued();
        task.arm(7, Duration::from_secs(5), 0);
        assert!(!task.armed_long_enough(7));
        assert!(task.armed_long_enough(8));
    }

    #[test]
    fn test_timeout_is_checked_against_execute_start() {
        let task = simple_task(TaskKind::Read);
        task.init();
        task.mark_queued();
        task.arm(0, Duration::from_millis(100), 1_000);
        task.begin_executing(1_000);

        assert!(!task.timed_out(1_050));
        assert!(task.timed_out(1_100));
        assert!(task.timed_out(5_000));
    }

    #[test]
    fn test_outcome_classification() {
        let task = simple_task(TaskKind::Read);
        drive_to_executing(&task);
        let outcome = task
            .set_ending_state(TaskState::Failed, Status::INSUFFICIENT_AUTHENTICATION)
            .unwrap();
        assert!(outcome.is_failure());
        assert!(!outcome.is_administrative());
        assert!(matches!(outcome.error(), Some(TaskError::Protocol { .. })));
    }

    #[test]
    fn test_precondition_evaluation() {
        let gate = Arc::new(AtomicBool::new(false));
        let gate_clone = gate.clone();
        let task = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .precondition(Precondition::new("gate", move || {
                gate_clone.load(Ordering::SeqCst)
            }))
            .operation(|| Exec::Launched)
            .build(bus(), 0);

        assert_eq!(task.failing_precondition(), Some("gate"));
        gate.store(true, Ordering::SeqCst);
        assert_eq!(task.failing_precondition(), None);
    }

    #[test]
    fn test_ordinal_assigned_once() {
        let task = simple_task(TaskKind::Read);
        task.assign_ordinal(5);
        task.assign_ordinal(9);
        assert_eq!(task.ordinal(), 5);
    }
}
