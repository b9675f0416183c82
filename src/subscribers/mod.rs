//! Event observers.

#[cfg(feature = "logging")]
mod log_writer;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log_writer::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
