//! Protocol status codes carried by radio completions.

use std::fmt;

/// Attribute-protocol status code attached to asynchronous completions.
///
/// The core treats these as opaque except for the handful of well-known
/// values below; everything non-zero is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// Operation completed successfully.
    pub const OK: Status = Status(0);
    /// No protocol status applies (administrative paths, local decisions).
    pub const NOT_APPLICABLE: Status = Status(-1);
    /// Authentication was required and failed or is missing.
    pub const INSUFFICIENT_AUTHENTICATION: Status = Status(0x05);
    /// The link supervision timeout fired.
    pub const CONNECTION_TIMEOUT: Status = Status(0x08);
    /// The peer terminated the connection.
    pub const PEER_TERMINATED: Status = Status(0x13);
    /// The controller failed to establish the link at all.
    pub const ESTABLISHMENT_FAILED: Status = Status(0x3E);

    /// Returns `true` for [`Status::OK`].
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::OK
    }

    /// Returns `true` when a real protocol status is present.
    #[inline]
    pub fn is_applicable(self) -> bool {
        self != Status::NOT_APPLICABLE
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Status::NOT_APPLICABLE => write!(f, "n/a"),
            Status(code) => write!(f, "{code} (0x{code:02X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_applicability() {
        assert!(Status::OK.is_success());
        assert!(!Status::CONNECTION_TIMEOUT.is_success());
        assert!(!Status::NOT_APPLICABLE.is_applicable());
        assert!(Status::CONNECTION_TIMEOUT.is_applicable());
    }
}
