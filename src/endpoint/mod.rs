//! Per-endpoint engines: connect-failure decisions, reconnect sessions, the
//! phantom-link repair, and the wake lock guarding reconnecting hosts.

#[allow(clippy::module_inception)]
mod endpoint;
mod fail;
mod phantom;
mod reconnect;
mod wake;

pub use endpoint::Endpoint;
pub use reconnect::SessionEnd;
pub use wake::{WakeHook, WakeLock};
