//! Tasks: the unit of scheduled radio work, their state machine, priorities,
//! kinds, and the relation rules the queue consults.

mod kind;
mod priority;
mod rules;
mod state;
#[allow(clippy::module_inception)]
mod task;

pub use kind::TaskKind;
pub use priority::Priority;
pub use state::TaskState;
pub use task::{
    Exec, OnOutcome, Operation, Precondition, Target, Task, TaskBuilder, TaskOutcome,
};

pub(crate) use rules::{
    is_cancellable_by, is_interruptable_by, is_more_important_than, is_softly_cancellable_by,
};
