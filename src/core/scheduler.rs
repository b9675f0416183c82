//! # The tick-stepped scheduler.
//!
//! One process-wide [`Scheduler`] drives the task queue: it arms, executes,
//! times out, and retires tasks, guaranteeing that at most one task
//! system-wide is executing at any instant — the radio serializes to one
//! in-flight operation, so the queue serializes with it.
//!
//! ## Tick algorithm
//! ```text
//! step(time_step, now):
//!   ├─ if no current task: dequeue → arm front task (no execution yet)
//!   └─ if current task:
//!        ├─ Armed, survived one full tick:
//!        │    ├─ soft-cancelled?        → SoftlyCancelled (operation never runs)
//!        │    ├─ precondition failing?  → FailedImmediately (no radio call)
//!        │    └─ else                   → Executing, fire operation closure
//!        └─ Executing: elapsed ≥ timeout → TimedOut
//! ```
//!
//! ## Arrival algorithm
//! ```text
//! add(task):
//!   ├─ current cancellable by task?    → current Cancelled, task to front, dequeue
//!   ├─ current interruptable by task?  → current Interrupted + re-queued behind task
//!   └─ else                            → priority insertion
//!   every arrival then sweeps queue + current for soft-cancellation
//! ```
//!
//! ## Rules
//! - Operation closures run with **no scheduler lock held**; a synchronous
//!   rejection maps to `FailedImmediately`.
//! - Completion callbacks to requesters are fired after locks are released;
//!   a callback may freely enqueue or cancel.
//! - Ending the current task immediately arms the next one (recursion
//!   bounded), honoring the configured delay between tasks.
//! - Late, duplicate, or mismatched completions are dropped with a log line;
//!   they never corrupt the current task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{TimeoutPolicy, TimeoutRequest};
use crate::radio::{EndpointId, Rejection, Status};
use crate::tasks::{
    is_cancellable_by, is_interruptable_by, is_softly_cancellable_by, Exec, Target, Task,
    TaskKind, TaskOutcome, TaskState,
};

use super::queue::{TaskQueue, Visit};

/// Bound on the end-task → dequeue-next cascade within one call.
const RECURSION_LIMIT: u32 = 10;

struct SchedState {
    current: Option<Arc<Task>>,
    /// Seconds since the last task ended; gates the delay between tasks.
    time_since_ending: f64,
    update_count: u64,
    next_ordinal: u64,
    suspended: bool,
    recursion: u32,
}

/// Time-stepped driver over the task queue. Owned by the link manager and
/// injected wherever enqueueing is needed; there is no ambient instance.
pub struct Scheduler {
    queue: TaskQueue,
    state: Mutex<SchedState>,
    bus: Bus,
    clock: Arc<dyn Clock>,
    timeout_policy: Arc<dyn TimeoutPolicy>,
    delay_between_tasks: f64,
    /// Ending reports queued while locks were held; drained lock-free.
    pending_reports: Mutex<Vec<(Arc<Task>, TaskOutcome)>>,
    draining: AtomicBool,
}

impl Scheduler {
    pub fn new(
        bus: Bus,
        clock: Arc<dyn Clock>,
        timeout_policy: Arc<dyn TimeoutPolicy>,
        delay_between_tasks: Duration,
    ) -> Self {
        Self {
            queue: TaskQueue::new(),
            state: Mutex::new(SchedState {
                current: None,
                time_since_ending: f64::INFINITY,
                update_count: 0,
                next_ordinal: 0,
                suspended: false,
                recursion: 0,
            }),
            bus,
            clock,
            timeout_policy,
            delay_between_tasks: delay_between_tasks.as_secs_f64(),
            pending_reports: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
        }
    }

    // ---- Arrival ----

    /// Enqueues a task, applying preemption against the current task and the
    /// soft-cancellation sweep.
    pub fn add(&self, task: Arc<Task>) {
        task.init();
        log::debug!("queueing task: {task}");

        {
            let mut state = self.state.lock().expect("scheduler poisoned");
            task.assign_ordinal(state.next_ordinal);
            state.next_ordinal += 1;

            let current = state.current.clone();
            match current {
                Some(cur) if is_cancellable_by(&cur, &task) => {
                    self.end_current_locked(&mut state, TaskState::Cancelled, Status::NOT_APPLICABLE, true);
                    self.queue.push_front(task.clone());
                    self.on_added_locked(&state, &task);
                    if state.current.is_none() {
                        self.dequeue_locked(&mut state);
                    }
                }
                Some(cur) if is_interruptable_by(&cur, &task) => {
                    self.end_current_locked(&mut state, TaskState::Interrupted, Status::NOT_APPLICABLE, true);
                    if cur.state() == TaskState::Interrupted {
                        cur.prepare_requeue();
                        self.queue.push_front(cur.clone());
                        cur.mark_queued();
                    }
                    self.queue.push_front(task.clone());
                    self.on_added_locked(&state, &task);
                }
                _ => {
                    self.queue.insert_at_soonest_position(task.clone());
                    self.on_added_locked(&state, &task);
                }
            }
        }

        self.drain_reports();
    }

    /// Marks the task queued and sweeps queue + current for tasks the
    /// newcomer softly cancels.
    fn on_added_locked(&self, state: &SchedState, newcomer: &Arc<Task>) {
        newcomer.mark_queued();

        for task in self.queue.snapshot() {
            if Arc::ptr_eq(&task, newcomer) {
                continue;
            }
            if is_softly_cancellable_by(&task, newcomer) {
                task.mark_soft_cancelled();
            }
        }
        if let Some(cur) = &state.current {
            if is_softly_cancellable_by(cur, newcomer) {
                cur.mark_soft_cancelled();
            }
        }
    }

    // ---- Tick ----

    /// Advances the scheduler by one tick. Returns `true` while a task is
    /// current (armed or executing).
    pub fn step(&self, time_step: Duration, now_ms: u64) -> bool {
        let dt = time_step.as_secs_f64();
        let mut to_execute: Option<Arc<Task>> = None;
        let busy;

        {
            let mut state = self.state.lock().expect("scheduler poisoned");
            if state.suspended {
                return false;
            }

            if state.current.is_none() {
                state.time_since_ending += dt;
                self.dequeue_locked(&mut state);
            }

            if let Some(cur) = state.current.clone() {
                cur.tick(dt);

                match cur.state() {
                    TaskState::Armed if cur.armed_long_enough(state.update_count) => {
                        if cur.was_soft_cancelled() {
                            self.end_current_locked(
                                &mut state,
                                TaskState::SoftlyCancelled,
                                Status::NOT_APPLICABLE,
                                false,
                            );
                        } else if let Some(condition) = cur.failing_precondition() {
                            log::debug!("task not executable ({condition}): {cur}");
                            self.end_current_locked(
                                &mut state,
                                TaskState::FailedImmediately,
                                Status::NOT_APPLICABLE,
                                false,
                            );
                        } else {
                            cur.begin_executing(now_ms);
                            to_execute = Some(cur);
                        }
                    }
                    TaskState::Executing if cur.timed_out(now_ms) => {
                        self.end_current_locked(
                            &mut state,
                            TaskState::TimedOut,
                            Status::NOT_APPLICABLE,
                            false,
                        );
                        if cur.kind().is_connection_oriented() {
                            let mut ev = Event::new(EventKind::StackTrouble)
                                .with_task(cur.kind().label())
                                .with_reason("connection task timed out");
                            if let Some(ep) = cur.endpoint() {
                                ev = ev.with_endpoint(ep.arc());
                            }
                            self.bus.publish(ev);
                        }
                    }
                    _ => {}
                }
            }

            state.update_count += 1;
            busy = state.current.is_some();
        }

        // The operation closure runs outside every scheduler lock, so a radio
        // binding that misbehaves and calls back synchronously cannot
        // deadlock us.
        if let Some(task) = to_execute {
            match task.execute() {
                Exec::Launched => {}
                Exec::Redundant => {
                    self.resolve_if_current(&task, TaskState::Redundant, Status::NOT_APPLICABLE);
                }
                Exec::Reject(rejection) => {
                    log::warn!("radio rejected {task}: {rejection}");
                    let status = match rejection {
                        Rejection::Stack(status) => status,
                        _ => Status::NOT_APPLICABLE,
                    };
                    self.resolve_if_current(&task, TaskState::FailedImmediately, status);
                }
            }
        }

        self.drain_reports();
        busy
    }

    /// Stops dequeuing while suspended; the current task still ticks.
    pub fn set_suspended(&self, suspended: bool) {
        let mut state = self.state.lock().expect("scheduler poisoned");
        if state.suspended != suspended {
            state.suspended = suspended;
            log::info!("scheduler suspended: {suspended}");
        }
    }

    pub fn update_count(&self) -> u64 {
        self.state.lock().expect("scheduler poisoned").update_count
    }

    // ---- Resolution (radio completions re-enter here) ----

    /// Resolves the current task if it matches `(kind, target)`. Returns
    /// `false` — after logging — for late, duplicate, or mismatched
    /// completions.
    pub fn resolve_current(
        &self,
        kind: TaskKind,
        target: &Target,
        ending: TaskState,
        status: Status,
        payload: Option<Vec<u8>>,
    ) -> bool {
        let resolved = {
            let mut state = self.state.lock().expect("scheduler poisoned");
            match state.current.clone() {
                Some(cur) if Self::matches(&cur, kind, target) => {
                    if let Some(payload) = payload {
                        cur.attach_payload(payload);
                    }
                    self.end_current_locked(&mut state, ending, status, false);
                    true
                }
                _ => {
                    log::debug!(
                        "dropping completion for {} on {:?}: no matching current task",
                        kind.label(),
                        target.endpoint().map(EndpointId::as_str),
                    );
                    false
                }
            }
        };
        self.drain_reports();
        resolved
    }

    /// Shorthand: resolve the matching current task `Succeeded`.
    pub fn succeed_current(&self, kind: TaskKind, target: &Target) -> bool {
        self.resolve_current(kind, target, TaskState::Succeeded, Status::OK, None)
    }

    /// Shorthand: resolve the matching current task `Failed` with a status.
    pub fn fail_current(&self, kind: TaskKind, target: &Target, status: Status) -> bool {
        self.resolve_current(kind, target, TaskState::Failed, status, None)
    }

    /// Interrupts the current task for the given endpoint, whatever its kind:
    /// it is paused and re-queued at its normal priority position.
    pub fn interrupt_current_for(&self, endpoint: &EndpointId) -> bool {
        let requeue = {
            let mut state = self.state.lock().expect("scheduler poisoned");
            match state.current.clone() {
                Some(cur) if cur.endpoint() == Some(endpoint) => {
                    self.end_current_locked(
                        &mut state,
                        TaskState::Interrupted,
                        Status::NOT_APPLICABLE,
                        true,
                    );
                    (cur.state() == TaskState::Interrupted).then_some(cur)
                }
                _ => None,
            }
        };

        match requeue {
            Some(task) => {
                task.prepare_requeue();
                self.add(task);
                true
            }
            None => {
                self.drain_reports();
                false
            }
        }
    }

    /// Fails the current task if it needs the given endpoint's connection —
    /// the link just dropped underneath it, waiting for its timeout would
    /// only delay the truth.
    pub fn fail_current_for_connection_loss(&self, endpoint: &EndpointId, status: Status) -> bool {
        let resolved = {
            let mut state = self.state.lock().expect("scheduler poisoned");
            match state.current.clone() {
                Some(cur)
                    if cur.endpoint() == Some(endpoint)
                        && cur.kind().requires_connection()
                        && cur.state() == TaskState::Executing =>
                {
                    self.end_current_locked(&mut state, TaskState::Failed, status, false);
                    true
                }
                _ => false,
            }
        };
        self.drain_reports();
        resolved
    }

    // ---- Queue maintenance ----

    /// Removes queued tasks of one kind for one target. Removed tasks resolve
    /// `ClearedFromQueue` (or `SoftlyCancelled` if already marked).
    pub fn clear_queue_of(&self, kind: TaskKind, target: &Target) {
        self.clear_matching(|task| Self::matches(task, kind, target));
    }

    /// Removes every queued task bound to the endpoint.
    pub fn clear_queue_for_endpoint(&self, endpoint: &EndpointId) {
        self.clear_matching(|task| task.endpoint() == Some(endpoint));
    }

    /// Removes everything from the queue (teardown).
    pub fn clear_queue_all(&self) {
        self.clear_matching(|_| true);
    }

    fn clear_matching(&self, matches: impl Fn(&Arc<Task>) -> bool) {
        self.queue.for_each(|task| {
            if matches(task) {
                let ending = if task.was_soft_cancelled() {
                    TaskState::SoftlyCancelled
                } else {
                    TaskState::ClearedFromQueue
                };
                if let Some(outcome) = task.set_ending_state(ending, Status::NOT_APPLICABLE) {
                    self.pending_reports
                        .lock()
                        .expect("scheduler reports poisoned")
                        .push((task.clone(), outcome));
                }
                Visit::ContinueAndDequeue
            } else {
                Visit::Continue
            }
        });
        self.drain_reports();
    }

    // ---- Queries ----

    /// The current (armed or executing) task, if any.
    pub fn current(&self) -> Option<Arc<Task>> {
        self.state.lock().expect("scheduler poisoned").current.clone()
    }

    pub fn is_current(&self, kind: TaskKind, target: &Target) -> bool {
        self.current()
            .map(|cur| Self::matches(&cur, kind, target))
            .unwrap_or(false)
    }

    pub fn is_in_queue(&self, kind: TaskKind, target: &Target) -> bool {
        self.queue
            .for_each(|task| {
                if Self::matches(task, kind, target) {
                    Visit::Return
                } else {
                    Visit::Continue
                }
            })
            .is_some()
    }

    pub fn is_current_or_queued(&self, kind: TaskKind, target: &Target) -> bool {
        self.is_current(kind, target) || self.is_in_queue(kind, target)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Point-in-time copy of the pending list, for diagnostics.
    pub fn queue_snapshot(&self) -> Vec<Arc<Task>> {
        self.queue.snapshot()
    }

    // ---- Internals ----

    fn matches(task: &Arc<Task>, kind: TaskKind, target: &Target) -> bool {
        task.kind() == kind && task.target() == target
    }

    /// Must hold the state lock. Ends the current task and, unless told not
    /// to, immediately arms the next one.
    fn end_current_locked(
        &self,
        state: &mut SchedState,
        ending: TaskState,
        status: Status,
        dont_dequeue: bool,
    ) -> bool {
        let Some(cur) = state.current.take() else {
            return false;
        };

        state.time_since_ending = 0.0;

        if let Some(outcome) = cur.set_ending_state(ending, status) {
            // Interrupted tasks go back to the queue; their real ending comes
            // later, so nothing is reported yet.
            if outcome.state != TaskState::Interrupted {
                self.pending_reports
                    .lock()
                    .expect("scheduler reports poisoned")
                    .push((cur.clone(), outcome));
            }
        }

        if !dont_dequeue && !self.queue.is_empty() && state.recursion < RECURSION_LIMIT {
            state.recursion += 1;
            self.dequeue_locked(state);
            state.recursion -= 1;
        }

        true
    }

    /// Must hold the state lock. Arms the next task if the slot is free and
    /// the delay between tasks has passed. Execution waits one full tick.
    fn dequeue_locked(&self, state: &mut SchedState) {
        if state.suspended || state.current.is_some() {
            return;
        }
        if self.delay_between_tasks > 0.0 && state.time_since_ending < self.delay_between_tasks {
            return;
        }

        if let Some(next) = self.queue.pop_front() {
            let timeout = self.timeout_policy.timeout_for(&TimeoutRequest {
                kind: next.kind(),
                endpoint: next.endpoint().cloned(),
            });
            next.arm(state.update_count, timeout, self.clock.now_ms());
            state.current = Some(next);
        }
    }

    fn resolve_if_current(&self, task: &Arc<Task>, ending: TaskState, status: Status) {
        let mut state = self.state.lock().expect("scheduler poisoned");
        if let Some(cur) = state.current.clone() {
            if Arc::ptr_eq(&cur, task) {
                self.end_current_locked(&mut state, ending, status, false);
            }
        }
    }

    /// Fires requester completion callbacks outside every lock. A callback
    /// may re-enter the scheduler; nested drains fold into this loop.
    fn drain_reports(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let batch: Vec<(Arc<Task>, TaskOutcome)> = {
                let mut pending = self
                    .pending_reports
                    .lock()
                    .expect("scheduler reports poisoned");
                std::mem::take(&mut *pending)
            };
            if batch.is_empty() {
                break;
            }
            for (task, outcome) in batch {
                task.report(&outcome);
            }
        }
        self.draining.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policies::DefaultTimeoutPolicy;
    use crate::tasks::Priority;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        scheduler: Scheduler,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
            let scheduler = Scheduler::new(
                Bus::new(256),
                clock.clone(),
                Arc::new(DefaultTimeoutPolicy::default()),
                Duration::ZERO,
            );
            Self { scheduler, clock }
        }

        fn tick(&self) {
            self.clock.advance(Duration::from_millis(10));
            self.scheduler
                .step(Duration::from_millis(10), self.clock.now_ms());
        }

        fn tick_n(&self, n: usize) {
            for _ in 0..n {
                self.tick();
            }
        }
    }

    fn counted_task(
        kind: TaskKind,
        ep: &str,
        executions: Arc<AtomicUsize>,
    ) -> Arc<Task> {
        Task::builder(kind, Target::Endpoint(EndpointId::new(ep)))
            .explicit(true)
            .operation(move || {
                executions.fetch_add(1, Ordering::SeqCst);
                Exec::Launched
            })
            .build(Bus::new(16), 0)
    }

    #[test]
    fn test_at_most_one_task_executing() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            h.scheduler
                .add(counted_task(TaskKind::Read, &format!("ep{i}"), execs.clone()));
        }

        h.tick_n(2);
        // First task is executing; the others must still be queued.
        let executing: Vec<_> = std::iter::once(h.scheduler.current())
            .flatten()
            .filter(|t| t.state() == TaskState::Executing)
            .collect();
        assert_eq!(executing.len(), 1);
        assert_eq!(h.scheduler.queue_len(), 2);
        assert_eq!(execs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_armed_survives_one_tick_before_executing() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        h.scheduler
            .add(counted_task(TaskKind::Read, "ep", execs.clone()));

        h.tick();
        assert_eq!(
            h.scheduler.current().unwrap().state(),
            TaskState::Armed,
            "armed on the dequeue tick"
        );
        assert_eq!(execs.load(Ordering::SeqCst), 0);

        h.tick();
        assert_eq!(h.scheduler.current().unwrap().state(), TaskState::Executing);
        assert_eq!(execs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_resolves_current() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let task = counted_task(TaskKind::Read, "ep", execs);
        h.scheduler.add(task.clone());
        h.tick_n(2);

        let target = Target::Endpoint(EndpointId::new("ep"));
        assert!(h.scheduler.succeed_current(TaskKind::Read, &target));
        assert_eq!(task.state(), TaskState::Succeeded);
        assert!(h.scheduler.current().is_none());
    }

    #[test]
    fn test_late_completion_is_dropped() {
        let h = Harness::new();
        let target = Target::Endpoint(EndpointId::new("ep"));
        assert!(!h.scheduler.succeed_current(TaskKind::Read, &target));

        let execs = Arc::new(AtomicUsize::new(0));
        let task = counted_task(TaskKind::Read, "ep", execs);
        h.scheduler.add(task.clone());
        h.tick_n(2);
        assert!(h.scheduler.succeed_current(TaskKind::Read, &target));
        // Duplicate completion: no matching current task anymore.
        assert!(!h.scheduler.succeed_current(TaskKind::Read, &target));
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[test]
    fn test_timeout_resolves_cooperatively() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let task = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .timeout(Duration::from_millis(50))
            .operation({
                let execs = execs.clone();
                move || {
                    execs.fetch_add(1, Ordering::SeqCst);
                    Exec::Launched
                }
            })
            .build(Bus::new(16), 0);
        h.scheduler.add(task.clone());

        h.tick_n(2);
        assert_eq!(task.state(), TaskState::Executing);
        h.tick_n(5);
        assert_eq!(task.state(), TaskState::TimedOut);
    }

    #[test]
    fn test_precondition_failure_resolves_without_radio_call() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let execs_clone = execs.clone();
        let task = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .precondition(crate::tasks::Precondition::new("connected", || false))
            .operation(move || {
                execs_clone.fetch_add(1, Ordering::SeqCst);
                Exec::Launched
            })
            .build(Bus::new(16), 0);
        h.scheduler.add(task.clone());

        h.tick_n(3);
        assert_eq!(task.state(), TaskState::FailedImmediately);
        assert_eq!(execs.load(Ordering::SeqCst), 0, "zero radio calls");
    }

    #[test]
    fn test_higher_priority_cancels_executing_current() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let read = counted_task(TaskKind::Read, "ep", execs.clone());
        h.scheduler.add(read.clone());
        h.tick_n(2);
        assert_eq!(read.state(), TaskState::Executing);

        let off = Task::builder(TaskKind::RadioOff, Target::Manager)
            .operation({
                let execs = execs.clone();
                move || {
                    execs.fetch_add(1, Ordering::SeqCst);
                    Exec::Launched
                }
            })
            .build(Bus::new(16), 0);
        h.scheduler.add(off.clone());

        // The read is cancelled at once, without waiting for its timeout, and
        // the radio-off task executes next.
        assert_eq!(read.state(), TaskState::Cancelled);
        h.tick_n(2);
        assert_eq!(off.state(), TaskState::Executing);
    }

    #[test]
    fn test_soft_cancelled_armed_task_never_executes() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let read = counted_task(TaskKind::Read, "ep", execs.clone());
        read.assign_ordinal(0);
        h.scheduler.add(read.clone());
        h.tick();
        assert_eq!(read.state(), TaskState::Armed);

        // An explicit disconnect for the same endpoint arrives while armed.
        let disconnect = Task::builder(
            TaskKind::Disconnect,
            Target::Endpoint(EndpointId::new("ep")),
        )
        .explicit(true)
        .operation(|| Exec::Launched)
        .build(Bus::new(16), 0);
        h.scheduler.add(disconnect);

        h.tick();
        assert_eq!(read.state(), TaskState::SoftlyCancelled);
        assert_eq!(execs.load(Ordering::SeqCst), 0, "operation never ran");
    }

    #[test]
    fn test_interrupted_task_requeues_and_runs_again() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let poll = counted_task(TaskKind::ReadSignalStrength, "ep", execs.clone());
        h.scheduler.add(poll.clone());
        h.tick_n(2);
        assert_eq!(poll.state(), TaskState::Executing);

        let connect = counted_task(TaskKind::Connect, "ep", execs.clone());
        h.scheduler.add(connect.clone());
        assert_eq!(poll.state(), TaskState::Queued, "interrupted then re-queued");

        // Connect runs first, then the poll gets its second execution.
        h.tick_n(2);
        assert_eq!(connect.state(), TaskState::Executing);
        let target = Target::Endpoint(EndpointId::new("ep"));
        h.scheduler.succeed_current(TaskKind::Connect, &target);
        h.tick_n(2);
        assert_eq!(poll.state(), TaskState::Executing);
        assert_eq!(execs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_between_tasks_gates_next_arm() {
        let clock = Arc::new(ManualClock::new(Duration::from_millis(10)));
        let scheduler = Scheduler::new(
            Bus::new(64),
            clock.clone(),
            Arc::new(DefaultTimeoutPolicy::default()),
            Duration::from_millis(30),
        );
        let tick = |n: usize| {
            for _ in 0..n {
                clock.advance(Duration::from_millis(10));
                scheduler.step(Duration::from_millis(10), clock.now_ms());
            }
        };

        let a = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .operation(|| Exec::Launched)
            .build(Bus::new(16), 0);
        let b = Task::builder(TaskKind::Read, Target::Endpoint(EndpointId::new("ep")))
            .operation(|| Exec::Launched)
            .build(Bus::new(16), 0);
        scheduler.add(a.clone());
        scheduler.add(b.clone());

        tick(2);
        scheduler.succeed_current(TaskKind::Read, &Target::Endpoint(EndpointId::new("ep")));
        assert_eq!(b.state(), TaskState::Queued, "delay holds b back");

        tick(1);
        assert_eq!(b.state(), TaskState::Queued);
        tick(3);
        assert!(matches!(b.state(), TaskState::Armed | TaskState::Executing));
    }

    #[test]
    fn test_clear_queue_reports_cleared() {
        let h = Harness::new();
        let execs = Arc::new(AtomicUsize::new(0));
        let a = counted_task(TaskKind::Read, "ep", execs.clone());
        let b = counted_task(TaskKind::Write, "ep", execs);
        h.scheduler.add(a.clone());
        h.scheduler.add(b.clone());

        h.scheduler.clear_queue_for_endpoint(&EndpointId::new("ep"));
        // Neither ever became current; both are cleared.
        assert_eq!(a.state(), TaskState::ClearedFromQueue);
        assert_eq!(b.state(), TaskState::ClearedFromQueue);
        assert_eq!(h.scheduler.queue_len(), 0);
    }

    #[test]
    fn test_priority_insertion_respects_fifo_on_ties() {
        let h = Harness::new();
        let mk = |prio: Priority| {
            Task::builder(TaskKind::Write, Target::Endpoint(EndpointId::new("ep")))
                .priority(prio)
                .operation(|| Exec::Launched)
                .build(Bus::new(16), 0)
        };
        let first = mk(Priority::Low);
        let second = mk(Priority::Low);
        let urgent = mk(Priority::High);
        h.scheduler.add(first.clone());
        h.scheduler.add(second.clone());
        h.scheduler.add(urgent.clone());

        let snapshot = h.scheduler.queue_snapshot();
        assert!(Arc::ptr_eq(&snapshot[0], &urgent));
        assert!(Arc::ptr_eq(&snapshot[1], &first));
        assert!(Arc::ptr_eq(&snapshot[2], &second));
    }
}
