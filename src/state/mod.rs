//! Bitmask endpoint-state tracking with intent provenance and durations.

mod bits;
mod intent;
mod link;
mod tracker;

pub use bits::{modified_bits, StateBits};
pub use intent::Intent;
pub use link::{ConnectStage, LinkState, ManagerState};
pub use tracker::{StateChange, StateListener, StateTracker};
