//! Task kind tags and the per-kind facts the rules tables consult.

use super::priority::Priority;

/// What a task does. Concrete behavior lives in the operation closure the
/// task carries; the kind tag drives priorities, preconditions, and the
/// cancellation/importance rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Connect,
    Disconnect,
    DiscoverAttributes,
    Read,
    Write,
    ToggleNotify,
    Bond,
    Unbond,
    ReadSignalStrength,
    NegotiateMtu,
    SetConnectionPriority,
    SetPhysicalLayer,
    RadioOn,
    RadioOff,
}

impl TaskKind {
    /// Short label for logs and events.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Connect => "connect",
            TaskKind::Disconnect => "disconnect",
            TaskKind::DiscoverAttributes => "discover-attributes",
            TaskKind::Read => "read",
            TaskKind::Write => "write",
            TaskKind::ToggleNotify => "toggle-notify",
            TaskKind::Bond => "bond",
            TaskKind::Unbond => "unbond",
            TaskKind::ReadSignalStrength => "read-signal-strength",
            TaskKind::NegotiateMtu => "negotiate-mtu",
            TaskKind::SetConnectionPriority => "set-connection-priority",
            TaskKind::SetPhysicalLayer => "set-physical-layer",
            TaskKind::RadioOn => "radio-on",
            TaskKind::RadioOff => "radio-off",
        }
    }

    /// Everything except the radio toggles themselves needs the radio on.
    #[inline]
    pub fn requires_radio(self) -> bool {
        !matches!(self, TaskKind::RadioOn | TaskKind::RadioOff)
    }

    /// Kinds that only make sense over an established link.
    #[inline]
    pub fn requires_connection(self) -> bool {
        matches!(
            self,
            TaskKind::DiscoverAttributes
                | TaskKind::Read
                | TaskKind::Write
                | TaskKind::ToggleNotify
                | TaskKind::ReadSignalStrength
                | TaskKind::NegotiateMtu
                | TaskKind::SetConnectionPriority
                | TaskKind::SetPhysicalLayer
        )
    }

    /// Kinds whose timeout indicates the stack itself is in trouble rather
    /// than one flaky operation.
    #[inline]
    pub fn is_connection_oriented(self) -> bool {
        matches!(
            self,
            TaskKind::Connect
                | TaskKind::Disconnect
                | TaskKind::DiscoverAttributes
                | TaskKind::Bond
                | TaskKind::Unbond
        )
    }

    /// Default priority when the caller does not choose one.
    pub fn default_priority(self) -> Priority {
        match self {
            TaskKind::Read | TaskKind::Write | TaskKind::ToggleNotify => {
                Priority::NORMAL_READS_WRITES
            }
            TaskKind::ReadSignalStrength => Priority::Trivial,
            TaskKind::Connect
            | TaskKind::Disconnect
            | TaskKind::DiscoverAttributes
            | TaskKind::Bond
            | TaskKind::Unbond => Priority::EXPLICIT_CONNECTING,
            TaskKind::NegotiateMtu
            | TaskKind::SetConnectionPriority
            | TaskKind::SetPhysicalLayer => Priority::NORMAL_READS_WRITES,
            TaskKind::RadioOn | TaskKind::RadioOff => Priority::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_toggles_do_not_require_radio() {
        assert!(!TaskKind::RadioOn.requires_radio());
        assert!(!TaskKind::RadioOff.requires_radio());
        assert!(TaskKind::Connect.requires_radio());
        assert!(TaskKind::Read.requires_radio());
    }

    #[test]
    fn test_connection_requirements() {
        assert!(TaskKind::Read.requires_connection());
        assert!(TaskKind::NegotiateMtu.requires_connection());
        assert!(!TaskKind::Connect.requires_connection());
        assert!(!TaskKind::Bond.requires_connection());
    }
}
