//! Event bus and structured runtime events.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
