//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] forwards events to the `log` facade in a terse,
//! human-readable format. Enabled via the `logging` feature; implement a
//! custom [`Subscribe`] for structured logging or metrics.
//!
//! ## Output format
//! ```text
//! [task] connect=executing ep=aa:bb
//! [state] ep=aa:bb 0x005 -> 0x004 intent=0x001 status=0
//! [connect-failed] ep=aa:bb attempt=3 reason=connection-failed status=62
//! [reconnect] ep=aa:bb attempt=1 delay=1000ms flavor=short-term
//! [trouble] connection task timed out
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::subscriber::Subscribe;

/// Log-facade subscriber. Not intended for production observability.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::TaskStateChanged => {
                log::info!(
                    "[task] {}={} ep={}",
                    e.task.unwrap_or("?"),
                    e.task_state.unwrap_or("?"),
                    e.endpoint.as_deref().unwrap_or("-"),
                );
            }
            EventKind::StateChanged => {
                log::info!(
                    "[state] ep={} 0x{:03X} -> 0x{:03X} intent=0x{:03X} status={}",
                    e.endpoint.as_deref().unwrap_or("-"),
                    e.state_old.unwrap_or(0),
                    e.state_new.unwrap_or(0),
                    e.state_intent.unwrap_or(0),
                    e.status.unwrap_or(-1),
                );
            }
            EventKind::ConnectFailed => {
                log::warn!(
                    "[connect-failed] ep={} attempt={} reason={} status={}",
                    e.endpoint.as_deref().unwrap_or("-"),
                    e.attempt.unwrap_or(0),
                    e.reason.as_deref().unwrap_or("?"),
                    e.status.unwrap_or(-1),
                );
            }
            EventKind::ReconnectAttempt => {
                log::info!(
                    "[reconnect] ep={} attempt={} delay={}ms flavor={}",
                    e.endpoint.as_deref().unwrap_or("-"),
                    e.attempt.unwrap_or(0),
                    e.delay_ms.unwrap_or(0),
                    e.reason.as_deref().unwrap_or("?"),
                );
            }
            EventKind::StackTrouble => {
                log::warn!("[trouble] {}", e.reason.as_deref().unwrap_or("?"));
            }
            EventKind::ObserverPanicked => {
                log::error!("[observer-panic] {}", e.reason.as_deref().unwrap_or("?"));
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
