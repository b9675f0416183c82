//! # Radio layer seam.
//!
//! The core never talks to a physical stack directly. It calls fire-and-forget
//! primitives on a [`Radio`] implementation, each returning an immediate
//! accept/reject, and the stack later reports the result as a [`RadioEvent`]
//! handed to [`LinkManager::deliver`](crate::LinkManager::deliver). Completions
//! may arrive late, duplicated, or never — the scheduler's cooperative
//! timeouts and current-task matching absorb all three.
//!
//! ## Rules
//! - A primitive must not call back into the core synchronously; it returns
//!   `Ok(())` once the operation is in flight.
//! - `raw_link_state` / `raw_bond_state` are *hints*. The core keeps its own
//!   abstracted state and only consults the raw queries to detect stack
//!   misreports (the phantom-link repair).

mod status;

pub use status::Status;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Opaque endpoint address (a peer device, or a connected client of the local
/// server role).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn arc(&self) -> Arc<str> {
        self.0.clone()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Handle addressing one attribute (characteristic or descriptor) on an
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrHandle(pub u16);

impl fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Requested link physical-layer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phy {
    OneMbit,
    TwoMbit,
    Coded,
}

/// Requested connection priority profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPriority {
    LowPower,
    Balanced,
    High,
}

/// Raw link state as reported by the stack's own query. A hint, never ground
/// truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Raw bond state as reported by the stack's own query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBondState {
    None,
    Bonding,
    Bonded,
}

/// Synchronous refusal from the radio layer. No operation is in flight.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum Rejection {
    /// The stack is busy with something it cannot queue behind.
    #[error("radio busy")]
    Busy,
    /// The operation is not supported by this stack/peer.
    #[error("operation unsupported")]
    Unsupported,
    /// The endpoint is unknown to the stack.
    #[error("unknown endpoint")]
    UnknownEndpoint,
    /// The stack refused with a protocol status.
    #[error("stack refused, status {0}")]
    Stack(Status),
}

/// Fire-and-forget radio primitives. One in-flight operation per physical
/// link; the scheduler above this trait enforces one in-flight operation
/// globally.
pub trait Radio: Send + Sync + 'static {
    // ---- Link lifecycle ----
    fn connect(&self, endpoint: &EndpointId) -> Result<(), Rejection>;
    fn disconnect(&self, endpoint: &EndpointId) -> Result<(), Rejection>;
    fn discover_attributes(&self, endpoint: &EndpointId) -> Result<(), Rejection>;

    // ---- Attribute operations ----
    fn read_attribute(&self, endpoint: &EndpointId, attr: AttrHandle) -> Result<(), Rejection>;
    fn write_attribute(
        &self,
        endpoint: &EndpointId,
        attr: AttrHandle,
        value: &[u8],
    ) -> Result<(), Rejection>;
    fn toggle_notify(
        &self,
        endpoint: &EndpointId,
        attr: AttrHandle,
        enable: bool,
    ) -> Result<(), Rejection>;

    // ---- Bonding ----
    fn bond(&self, endpoint: &EndpointId) -> Result<(), Rejection>;
    fn unbond(&self, endpoint: &EndpointId) -> Result<(), Rejection>;

    // ---- Link tuning ----
    fn read_signal_strength(&self, endpoint: &EndpointId) -> Result<(), Rejection>;
    fn negotiate_mtu(&self, endpoint: &EndpointId, mtu: u16) -> Result<(), Rejection>;
    fn set_connection_priority(
        &self,
        endpoint: &EndpointId,
        priority: LinkPriority,
    ) -> Result<(), Rejection>;
    fn set_physical_layer(&self, endpoint: &EndpointId, phy: Phy) -> Result<(), Rejection>;

    // ---- Manager ----
    fn enable_radio(&self) -> Result<(), Rejection>;
    fn disable_radio(&self) -> Result<(), Rejection>;

    /// Whether the radio is currently enabled, for initial-state seeding.
    /// Like every raw query, a hint.
    fn radio_enabled(&self) -> bool;

    // ---- Raw state hints ----
    fn raw_link_state(&self, endpoint: &EndpointId) -> RawLinkState;
    fn raw_bond_state(&self, endpoint: &EndpointId) -> RawBondState;
}

/// Asynchronous completion reported by the radio layer.
///
/// Delivered through [`LinkManager::deliver`](crate::LinkManager::deliver),
/// which marshals it onto the scheduler thread.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The link opened.
    Connected { endpoint: EndpointId },
    /// A connect attempt failed before the link opened.
    ConnectFailed { endpoint: EndpointId, status: Status },
    /// The link closed (requested or spontaneous — the core decides which by
    /// matching against the current task).
    Disconnected { endpoint: EndpointId, status: Status },
    /// Attribute discovery finished.
    AttributesDiscovered { endpoint: EndpointId, status: Status },
    /// A read completed; `value` is present on success.
    ReadCompleted {
        endpoint: EndpointId,
        attr: AttrHandle,
        status: Status,
        value: Option<Vec<u8>>,
    },
    /// A write completed.
    WriteCompleted {
        endpoint: EndpointId,
        attr: AttrHandle,
        status: Status,
    },
    /// A notify toggle completed.
    NotifyToggled {
        endpoint: EndpointId,
        attr: AttrHandle,
        enabled: bool,
        status: Status,
    },
    /// A bond attempt finished.
    BondResult { endpoint: EndpointId, status: Status },
    /// An unbond finished.
    UnbondResult { endpoint: EndpointId, status: Status },
    /// A signal-strength read completed.
    SignalStrength {
        endpoint: EndpointId,
        rssi: i8,
        status: Status,
    },
    /// An MTU negotiation completed.
    MtuNegotiated {
        endpoint: EndpointId,
        mtu: u16,
        status: Status,
    },
    /// A connection-priority change completed.
    PriorityChanged { endpoint: EndpointId, status: Status },
    /// A physical-layer change completed.
    PhyChanged {
        endpoint: EndpointId,
        phy: Phy,
        status: Status,
    },
    /// The radio itself turned on or off.
    RadioStateChanged { on: bool },
}

impl RadioEvent {
    /// The endpoint this completion concerns, if any.
    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            RadioEvent::Connected { endpoint }
            | RadioEvent::ConnectFailed { endpoint, .. }
            | RadioEvent::Disconnected { endpoint, .. }
            | RadioEvent::AttributesDiscovered { endpoint, .. }
            | RadioEvent::ReadCompleted { endpoint, .. }
            | RadioEvent::WriteCompleted { endpoint, .. }
            | RadioEvent::NotifyToggled { endpoint, .. }
            | RadioEvent::BondResult { endpoint, .. }
            | RadioEvent::UnbondResult { endpoint, .. }
            | RadioEvent::SignalStrength { endpoint, .. }
            | RadioEvent::MtuNegotiated { endpoint, .. }
            | RadioEvent::PriorityChanged { endpoint, .. }
            | RadioEvent::PhyChanged { endpoint, .. } => Some(endpoint),
            RadioEvent::RadioStateChanged { .. } => None,
        }
    }
}
