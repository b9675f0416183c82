//! Concrete state sets: per-endpoint link states and manager radio states.

use super::bits::StateBits;

/// Per-endpoint link states. Several bits are set concurrently; e.g. a fully
/// set-up endpoint is `Connected | Discovered | Initialized | Bonded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link, and nothing in progress.
    Disconnected,
    /// A connect attempt is in flight (covers the whole pipeline up to
    /// initialization).
    Connecting,
    /// The physical link is open.
    Connected,
    /// Attribute discovery is in flight.
    Discovering,
    /// The attribute database has been discovered.
    Discovered,
    /// The endpoint is fully usable; connect pipelines end here.
    Initialized,
    /// A bond attempt is in flight.
    Bonding,
    /// The endpoint is bonded.
    Bonded,
    /// The endpoint is explicitly not bonded.
    Unbonded,
    /// A short-term reconnect session is running; the endpoint is treated as
    /// transiently still present.
    ReconnectingShortTerm,
    /// A long-term reconnect session is running; the endpoint is gone but we
    /// keep trying.
    ReconnectingLongTerm,
    /// A granted connect retry is driving the endpoint back through
    /// disconnected; "still trying overall".
    RetryingConnection,
}

impl LinkState {
    const ALL: [LinkState; 12] = [
        LinkState::Disconnected,
        LinkState::Connecting,
        LinkState::Connected,
        LinkState::Discovering,
        LinkState::Discovered,
        LinkState::Initialized,
        LinkState::Bonding,
        LinkState::Bonded,
        LinkState::Unbonded,
        LinkState::ReconnectingShortTerm,
        LinkState::ReconnectingLongTerm,
        LinkState::RetryingConnection,
    ];

    /// Default externally tracked states: everything except the transient
    /// mid-pipeline bit.
    pub fn default_tracked() -> u32 {
        Self::full_mask() & !LinkState::Discovering.bit()
    }
}

impl StateBits for LinkState {
    const COUNT: usize = 12;

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn label(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Discovering => "discovering",
            LinkState::Discovered => "discovered",
            LinkState::Initialized => "initialized",
            LinkState::Bonding => "bonding",
            LinkState::Bonded => "bonded",
            LinkState::Unbonded => "unbonded",
            LinkState::ReconnectingShortTerm => "reconnecting-short-term",
            LinkState::ReconnectingLongTerm => "reconnecting-long-term",
            LinkState::RetryingConnection => "retrying-connection",
        }
    }
}

/// Manager-level radio states. Exactly one is set at a time in practice, but
/// the tracker does not enforce that; transitions go through the same diff
/// machinery as endpoint states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl ManagerState {
    const ALL: [ManagerState; 4] = [
        ManagerState::Off,
        ManagerState::TurningOn,
        ManagerState::On,
        ManagerState::TurningOff,
    ];
}

impl StateBits for ManagerState {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    fn all() -> &'static [Self] {
        &Self::ALL
    }

    fn label(self) -> &'static str {
        match self {
            ManagerState::Off => "off",
            ManagerState::TurningOn => "turning-on",
            ManagerState::On => "on",
            ManagerState::TurningOff => "turning-off",
        }
    }
}

/// How far a connect attempt got before failing. Ordered: later stages compare
/// greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectStage {
    /// The attempt never left the gate.
    None,
    Connecting,
    Connected,
    Discovering,
    Discovered,
    Initializing,
    Initialized,
}

impl ConnectStage {
    /// Short label for events and logs.
    pub fn label(self) -> &'static str {
        match self {
            ConnectStage::None => "none",
            ConnectStage::Connecting => "connecting",
            ConnectStage::Connected => "connected",
            ConnectStage::Discovering => "discovering",
            ConnectStage::Discovered => "discovered",
            ConnectStage::Initializing => "initializing",
            ConnectStage::Initialized => "initialized",
        }
    }
}
