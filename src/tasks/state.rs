//! Task lifecycle states.

/// States a task moves through from creation to one of the ending states.
///
/// ```text
/// Created → Initialized → Queued → Armed → Executing ──► Succeeded
///                           ▲                        ├─► TimedOut
///                           └──── Interrupted ◄──────┤
///                                                    ├─► Failed
///            (armed/queued may also end directly)    └─► ...
/// ```
///
/// Everything ordinally after [`TaskState::Executing`] is a terminal "ending
/// state". Once reached it never changes, with one exception: a pending
/// soft-cancel converts the would-be ending into
/// [`TaskState::SoftlyCancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    /// Very transient; set at construction.
    Created,
    /// Transient; the task has been initialized and may be queued.
    Initialized,
    /// In the queue. The previous state is `Initialized` or `Interrupted`.
    Queued,
    /// Current but not yet executing. A task must survive one full scheduler
    /// tick armed before it may execute.
    Armed,
    /// The radio call is in flight.
    Executing,

    // ---- Ending states ----
    /// The completion arrived with a success status.
    Succeeded,
    /// No completion arrived within the allotted duration.
    TimedOut,
    /// Paused and re-queued; the next state will be `Queued`.
    Interrupted,
    /// Hard-cancelled by an unrelated higher-priority task.
    Cancelled,
    /// Cooperatively cancelled: the radio call was allowed to finish but the
    /// outcome was reinterpreted.
    SoftlyCancelled,
    /// The completion arrived with a failure status.
    Failed,
    /// Removed from the queue wholesale (teardown, explicit clears).
    ClearedFromQueue,
    /// The requested condition already held; no radio call was made.
    Redundant,
    /// The operation could not even be sent off: a precondition was false or
    /// the radio refused synchronously.
    FailedImmediately,
}

impl TaskState {
    /// Returns `true` for terminal states.
    #[inline]
    pub fn is_ending(self) -> bool {
        self > TaskState::Executing
    }

    /// Short label for logs and events.
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Initialized => "initialized",
            TaskState::Queued => "queued",
            TaskState::Armed => "armed",
            TaskState::Executing => "executing",
            TaskState::Succeeded => "succeeded",
            TaskState::TimedOut => "timed-out",
            TaskState::Interrupted => "interrupted",
            TaskState::Cancelled => "cancelled",
            TaskState::SoftlyCancelled => "softly-cancelled",
            TaskState::Failed => "failed",
            TaskState::ClearedFromQueue => "cleared-from-queue",
            TaskState::Redundant => "redundant",
            TaskState::FailedImmediately => "failed-immediately",
        }
    }
}
