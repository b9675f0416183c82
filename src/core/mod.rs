//! The serialized task queue and its tick-stepped scheduler.

mod queue;
mod scheduler;

pub use queue::Visit;
pub use scheduler::Scheduler;

pub(crate) use queue::TaskQueue;
