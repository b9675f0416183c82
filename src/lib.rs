//! # linkvisor
//!
//! **linkvisor** is a task-scheduling and state-machine core for GATT-style
//! short-range radio links.
//!
//! It sits on top of a radio stack that serializes to one in-flight operation
//! per link, reports completion asynchronously via callbacks that may arrive
//! late, duplicated, or never, and frequently misreports its own state. On
//! top of that it guarantees global operation ordering, survives missing
//! completions, and lets pluggable policies decide retry behavior without
//! corrupting scheduler invariants.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   connect() / read() / bond() ...        deliver(RadioEvent)
//!               │                                  │
//!               ▼                                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  LinkManager (owns everything; no ambient state)                  │
//! │  - Bus (broadcast events)                                         │
//! │  - Scheduler (one global task queue, one current task)            │
//! │  - StateTracker per endpoint + manager (bitmask, intent, times)   │
//! │  - command channel (single consumer = scheduler thread)           │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//! ┌──────────────┐  ┌───────────────┐  ┌──────────────┐        │
//! │  Endpoint A  │  │  Endpoint B   │  │  Endpoint N  │        │
//! │  fail engine │  │  fail engine  │  │  fail engine │        │
//! │  reconnect ×2│  │  reconnect ×2 │  │  reconnect ×2│        │
//! └──────┬───────┘  └──────┬────────┘  └──────┬───────┘        ▼
//!        └─────────────────┴─────────────────┴────────► Radio (trait)
//! ```
//!
//! ### Task lifecycle
//! ```text
//! request ──► Task ──► queue (priority insertion, ordinal FIFO ties)
//!
//! tick {
//!   ├─► no current? dequeue + arm (one full tick armed before executing)
//!   ├─► armed:     soft-cancelled → SoftlyCancelled
//!   │              precondition false → FailedImmediately (no radio call)
//!   │              else → Executing, fire radio primitive
//!   └─► executing: elapsed ≥ timeout → TimedOut
//! }
//!
//! completion (async, scheduler thread) ──► Succeeded / Failed
//! connect failures ──► ConnectionFail engine ──► retry? ──► new connect Task
//! unexpected drops ──► short-term session ──► long-term session ──► settle
//! ```
//!
//! ## Features
//! | Area            | Description                                            | Key types / traits                           |
//! |-----------------|--------------------------------------------------------|----------------------------------------------|
//! | **Scheduling**  | One global serialized queue with preemption rules.     | [`Scheduler`], [`Task`], [`Priority`]        |
//! | **State**       | Bitmask trackers with intent and duration tracking.    | [`StateTracker`], [`LinkState`], [`Intent`]  |
//! | **Recovery**    | Connect-fail decisions and reconnect sessions.         | [`ConnectFailPolicy`], [`ReconnectPolicy`]   |
//! | **Radio seam**  | Fire-and-forget primitives + async completions.        | [`Radio`], [`RadioEvent`], [`Status`]        |
//! | **Observability** | Broadcast events and panic-isolated subscribers.     | [`Event`], [`Subscribe`]                     |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use linkvisor::{Config, EndpointId, LinkManager, Radio, RadioEvent, Status};
//!
//! # fn radio() -> Arc<dyn Radio> { unimplemented!() }
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let manager = LinkManager::builder(Config::default(), radio()).build();
//!
//!     let token = CancellationToken::new();
//!     tokio::spawn(manager.clone().run(token.clone()));
//!
//!     manager.enable_radio();
//!     let endpoint = manager.endpoint(&EndpointId::new("aa:bb:cc:dd:ee:ff"));
//!     endpoint.connect();
//!
//!     // The radio binding reports completions back:
//!     manager.deliver(RadioEvent::Connected {
//!         endpoint: EndpointId::new("aa:bb:cc:dd:ee:ff"),
//!     });
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     token.cancel();
//! }
//! ```

mod clock;
mod config;
mod core;
mod endpoint;
mod error;
mod events;
mod manager;
mod policies;
mod radio;
mod state;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use core::{Scheduler, Visit};
pub use endpoint::{Endpoint, SessionEnd, WakeHook, WakeLock};
pub use error::{RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use manager::{Command, LinkManager, LinkManagerBuilder};
pub use policies::{
    BondFailEvent, BondRetryPolicy, ConnectFailDecision, ConnectFailEvent, ConnectFailPolicy,
    ConnectionLostEvent, DefaultBondRetryPolicy, DefaultConnectFailPolicy, DefaultReconnectPolicy,
    DefaultTimeoutPolicy, DisconnectReason, FailureKind, Inquiry, Jitter, PolicySet,
    ReconnectDecision, ReconnectPolicy, SessionFlavor, TimeoutPolicy, TimeoutRequest, Timing,
};
pub use radio::{
    AttrHandle, EndpointId, LinkPriority, Phy, Radio, RadioEvent, RawBondState, RawLinkState,
    Rejection, Status,
};
pub use state::{
    modified_bits, ConnectStage, Intent, LinkState, ManagerState, StateBits, StateChange,
    StateListener, StateTracker,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    Exec, OnOutcome, Operation, Precondition, Priority, Target, Task, TaskBuilder, TaskKind,
    TaskOutcome, TaskState,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
