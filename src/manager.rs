//! # LinkManager: owns the scheduler, the endpoints, and the driver loop.
//!
//! The [`LinkManager`] is the explicit top-level object — there is no ambient
//! static state. It owns the event bus, the [`Scheduler`], the endpoint
//! registry, the manager-state tracker, the wake lock, and the
//! single-consumer command channel that funnels every externally triggered
//! mutation onto the scheduler thread.
//!
//! ## Threading
//! ```text
//! caller threads                scheduler thread (run loop)
//! ──────────────                ───────────────────────────
//! deliver(RadioEvent) ──┐
//! invoke(closure)     ──┼──► mpsc ──► command drain ──► endpoint engines
//!                       │             clock tick     ──► Scheduler::step
//! ep.connect()/read() ──┴──────────► Scheduler::add (mutex-guarded)
//! ```
//!
//! Radio completions re-enter through [`LinkManager::deliver`], which posts a
//! command; state mutation therefore stays funneled through one logical
//! thread. Task enqueueing is safe from any thread (the queue carries its own
//! mutex).
//!
//! ## Driving
//! - Production: `tokio::spawn(manager.clone().run(token))`.
//! - Tests: call [`LinkManager::step`] with a [`ManualClock`](crate::clock::ManualClock);
//!   commands are drained first, then the clock tick runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::core::Scheduler;
use crate::endpoint::{Endpoint, WakeHook, WakeLock};
use crate::error::RuntimeError;
use crate::events::{Bus, Event};
use crate::policies::PolicySet;
use crate::radio::{EndpointId, Radio, RadioEvent, Status};
use crate::state::{Intent, ManagerState, StateTracker};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{Exec, Priority, Target, Task, TaskKind};

/// Closure marshalled onto the scheduler thread.
pub type Command = Box<dyn FnOnce(&LinkManager) + Send>;

/// Builder for [`LinkManager`].
pub struct LinkManagerBuilder {
    cfg: Config,
    radio: Arc<dyn Radio>,
    clock: Option<Arc<dyn Clock>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    policies: PolicySet,
    wake_hook: Option<Arc<dyn WakeHook>>,
}

impl LinkManagerBuilder {
    /// Overrides the clock (tests use [`ManualClock`](crate::clock::ManualClock)).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Adds event subscribers.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Replaces the default policy bundle.
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    /// Installs the platform wake-lock hook.
    pub fn with_wake_hook(mut self, hook: Arc<dyn WakeHook>) -> Self {
        self.wake_hook = Some(hook);
        self
    }

    pub fn build(self) -> Arc<LinkManager> {
        let clock: Arc<dyn Clock> = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new(self.cfg.tick)));
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let scheduler = Arc::new(Scheduler::new(
            bus.clone(),
            clock.clone(),
            self.policies.timeout.clone(),
            self.cfg.delay_between_tasks,
        ));
        let tracker = Arc::new(StateTracker::<ManagerState>::new(
            clock.clone(),
            bus.clone(),
            None,
        ));
        let initial = if self.radio.radio_enabled() {
            ManagerState::On
        } else {
            ManagerState::Off
        };
        tracker.update(Intent::Unintentional, Status::NOT_APPLICABLE.0, &[(initial, true)]);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        Arc::new(LinkManager {
            subs: Arc::new(SubscriberSet::new(self.subscribers, bus.clone())),
            wake: Arc::new(WakeLock::new(self.wake_hook)),
            endpoints: Mutex::new(HashMap::new()),
            cmd_rx: Mutex::new(Some(cmd_rx)),
            cfg: self.cfg,
            radio: self.radio,
            policies: self.policies,
            clock,
            bus,
            scheduler,
            tracker,
            cmd_tx,
        })
    }
}

/// Top-level manager for one radio and its endpoints.
pub struct LinkManager {
    cfg: Config,
    bus: Bus,
    clock: Arc<dyn Clock>,
    radio: Arc<dyn Radio>,
    scheduler: Arc<Scheduler>,
    tracker: Arc<StateTracker<ManagerState>>,
    endpoints: Mutex<HashMap<EndpointId, Arc<Endpoint>>>,
    wake: Arc<WakeLock>,
    policies: PolicySet,
    subs: Arc<SubscriberSet>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl LinkManager {
    /// Starts building a manager over the given radio.
    pub fn builder(cfg: Config, radio: Arc<dyn Radio>) -> LinkManagerBuilder {
        LinkManagerBuilder {
            cfg,
            radio,
            clock: None,
            subscribers: Vec::new(),
            policies: PolicySet::default(),
            wake_hook: None,
        }
    }

    // ---- Endpoints ----

    /// Returns the endpoint for `id`, creating it on first use.
    pub fn endpoint(&self, id: &EndpointId) -> Arc<Endpoint> {
        let mut endpoints = self.endpoints.lock().expect("endpoints poisoned");
        endpoints
            .entry(id.clone())
            .or_insert_with(|| {
                Endpoint::new(
                    id.clone(),
                    self.cfg.clone(),
                    self.bus.clone(),
                    self.clock.clone(),
                    self.radio.clone(),
                    self.scheduler.clone(),
                    self.tracker.clone(),
                    self.wake.clone(),
                    self.policies.clone(),
                )
            })
            .clone()
    }

    /// Ids of every endpoint seen so far, sorted.
    pub fn known_endpoints(&self) -> Vec<EndpointId> {
        let endpoints = self.endpoints.lock().expect("endpoints poisoned");
        let mut ids: Vec<EndpointId> = endpoints.keys().cloned().collect();
        ids.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    // ---- Queries ----

    pub fn is(&self, state: ManagerState) -> bool {
        self.tracker.is(state)
    }

    /// Subscribes to the raw event stream (independent of [`Subscribe`]rs).
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// The scheduler, for queue inspection and advanced task control.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Outstanding wake-lock references (one per running reconnect session).
    pub fn wake_references(&self) -> usize {
        self.wake.count()
    }

    // ---- Radio toggles ----

    /// Queues a radio-enable task at critical priority.
    pub fn enable_radio(&self) {
        let tracker = self.tracker.clone();
        let radio = self.radio.clone();
        let task = Task::builder(TaskKind::RadioOn, Target::Manager)
            .explicit(true)
            .priority(Priority::Critical)
            .operation(move || {
                if tracker.is(ManagerState::On) {
                    return Exec::Redundant;
                }
                tracker.update(
                    Intent::Intentional,
                    Status::NOT_APPLICABLE.0,
                    &[(ManagerState::TurningOn, true), (ManagerState::Off, false)],
                );
                match radio.enable_radio() {
                    Ok(()) => Exec::Launched,
                    Err(rejection) => Exec::Reject(rejection),
                }
            })
            .build(self.bus.clone(), self.clock.now_ms());
        self.scheduler.add(task);
    }

    /// Tears down every connected endpoint, then queues the radio-disable
    /// task. The teardown disconnects share the radio-off priority and were
    /// queued first, so they run first; the radio-off arrival also cancels
    /// whatever radio-dependent task is currently executing.
    pub fn disable_radio(&self) {
        let endpoints: Vec<Arc<Endpoint>> = {
            let map = self.endpoints.lock().expect("endpoints poisoned");
            map.values().cloned().collect()
        };
        for endpoint in endpoints {
            if endpoint.is(crate::state::LinkState::Connected) {
                endpoint.disconnect_for_radio_off();
            }
        }

        let tracker = self.tracker.clone();
        let radio = self.radio.clone();
        let task = Task::builder(TaskKind::RadioOff, Target::Manager)
            .explicit(true)
            .priority(Priority::Critical)
            .operation(move || {
                if tracker.is(ManagerState::Off) {
                    return Exec::Redundant;
                }
                tracker.update(
                    Intent::Intentional,
                    Status::NOT_APPLICABLE.0,
                    &[(ManagerState::TurningOff, true), (ManagerState::On, false)],
                );
                match radio.disable_radio() {
                    Ok(()) => Exec::Launched,
                    Err(rejection) => Exec::Reject(rejection),
                }
            })
            .build(self.bus.clone(), self.clock.now_ms());
        self.scheduler.add(task);
    }

    // ---- Command channel ----

    /// Marshals a closure onto the scheduler thread.
    pub fn invoke(&self, f: impl FnOnce(&LinkManager) + Send + 'static) {
        if self.cmd_tx.send(Box::new(f)).is_err() {
            log::error!("command channel closed; dropping command");
        }
    }

    /// Hands an asynchronous radio completion to the core. Safe to call from
    /// any thread; the event is marshalled onto the scheduler thread.
    pub fn deliver(&self, event: RadioEvent) {
        self.invoke(move |manager| manager.handle_radio_event(event));
    }

    // ---- Driving ----

    /// Drives the core until cancelled: drains commands as they arrive and
    /// steps the clock once per tick.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<(), RuntimeError> {
        let mut rx = {
            let mut guard = self.cmd_rx.lock().expect("command receiver poisoned");
            guard.take().ok_or(RuntimeError::AlreadyRunning)?
        };
        self.spawn_subscriber_listener(token.clone());

        let mut interval = tokio::time::interval(self.cfg.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => {
                        command(&self);
                        while let Ok(next) = rx.try_recv() {
                            next(&self);
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    self.tick(self.clock.time_step(), self.clock.now_ms());
                }
            }
        }
        Ok(())
    }

    /// One manual step: drains pending commands, then ticks the scheduler,
    /// the reconnect sessions, and the phantom repairs. Test entry point.
    pub fn step(&self, time_step: Duration, now_ms: u64) {
        self.drain_commands();
        self.tick(time_step, now_ms);
    }

    fn tick(&self, time_step: Duration, now_ms: u64) {
        self.scheduler.step(time_step, now_ms);

        let endpoints: Vec<Arc<Endpoint>> = {
            let map = self.endpoints.lock().expect("endpoints poisoned");
            map.values().cloned().collect()
        };
        let dt = time_step.as_secs_f64();
        for endpoint in endpoints {
            endpoint.update(dt);
        }
    }

    fn drain_commands(&self) {
        let commands: Vec<Command> = {
            let mut guard = self.cmd_rx.lock().expect("command receiver poisoned");
            match guard.as_mut() {
                Some(rx) => {
                    let mut drained = Vec::new();
                    while let Ok(command) = rx.try_recv() {
                        drained.push(command);
                    }
                    drained
                }
                // The run loop owns the receiver and drains it itself.
                None => Vec::new(),
            }
        };
        for command in commands {
            command(self);
        }
    }

    fn spawn_subscriber_listener(&self, token: CancellationToken) {
        if self.subs.is_empty() {
            return;
        }
        let subs = self.subs.clone();
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => subs.emit(&event).await,
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("subscriber listener lagged, skipped {skipped} events");
                        }
                    }
                }
            }
        });
    }

    // ---- Completion dispatch ----

    fn handle_radio_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::RadioStateChanged { on } => self.handle_radio_state(on),
            other => {
                let Some(id) = other.endpoint().cloned() else {
                    return;
                };
                let endpoint = self.endpoint(&id);
                match other {
                    RadioEvent::Connected { .. } => endpoint.on_radio_connected(),
                    RadioEvent::ConnectFailed { status, .. } => {
                        endpoint.on_radio_connect_failed(status)
                    }
                    RadioEvent::Disconnected { status, .. } => {
                        endpoint.on_radio_disconnected(status)
                    }
                    RadioEvent::AttributesDiscovered { status, .. } => {
                        endpoint.on_attributes_discovered(status)
                    }
                    RadioEvent::ReadCompleted { status, value, .. } => {
                        endpoint.on_read_completed(status, value)
                    }
                    RadioEvent::WriteCompleted { status, .. } => {
                        endpoint.on_simple_completed(TaskKind::Write, status)
                    }
                    RadioEvent::NotifyToggled {
                        attr,
                        enabled,
                        status,
                        ..
                    } => endpoint.on_notify_toggled(attr, enabled, status),
                    RadioEvent::BondResult { status, .. } => endpoint.on_bond_result(status),
                    RadioEvent::UnbondResult { status, .. } => endpoint.on_unbond_result(status),
                    RadioEvent::SignalStrength { status, .. } => {
                        endpoint.on_simple_completed(TaskKind::ReadSignalStrength, status)
                    }
                    RadioEvent::MtuNegotiated { status, .. } => {
                        endpoint.on_simple_completed(TaskKind::NegotiateMtu, status)
                    }
                    RadioEvent::PriorityChanged { status, .. } => {
                        endpoint.on_simple_completed(TaskKind::SetConnectionPriority, status)
                    }
                    RadioEvent::PhyChanged { status, .. } => {
                        endpoint.on_simple_completed(TaskKind::SetPhysicalLayer, status)
                    }
                    RadioEvent::RadioStateChanged { .. } => unreachable!(),
                }
            }
        }
    }

    fn handle_radio_state(&self, on: bool) {
        if on {
            self.scheduler
                .succeed_current(TaskKind::RadioOn, &Target::Manager);
            self.tracker
                .set(Intent::Intentional, Status::NOT_APPLICABLE.0, &[(ManagerState::On, true)]);
        } else {
            self.scheduler
                .succeed_current(TaskKind::RadioOff, &Target::Manager);
            self.tracker
                .set(Intent::Intentional, Status::NOT_APPLICABLE.0, &[(ManagerState::Off, true)]);

            let endpoints: Vec<Arc<Endpoint>> = {
                let map = self.endpoints.lock().expect("endpoints poisoned");
                map.values().cloned().collect()
            };
            for endpoint in endpoints {
                endpoint.on_radio_disabled();
            }
        }
    }
}
