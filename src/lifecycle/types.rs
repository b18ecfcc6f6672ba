//! Lifecycle types: ClatState, ClatEvent, the transition table, link snapshot
//! and state-change notification payload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::InterfaceName;

/// Translation interface lifecycle state.
///
/// State transitions:
/// ```text
/// STOPPED → STARTING → RUNNING
///    ↑  ↖______|_________|
///    |         ↓         ↓
///    └────── STOPPING ←──┘
/// ```
/// `Starting` falls straight back to `Stopped` when the upstream is not
/// eligible; `Stopping` never rests and always settles in `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClatState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ClatState {
    pub const ALL: [ClatState; 4] = [
        ClatState::Stopped,
        ClatState::Starting,
        ClatState::Running,
        ClatState::Stopping,
    ];

    /// Transition table: what this state does with `event`.
    pub const fn on(self, event: ClatEvent) -> Reaction {
        use ClatEvent::*;
        use ClatState::*;

        match (self, event) {
            // STOPPED
            (Stopped, UpstreamUp) => Reaction::Enter(Starting),
            (Stopped, ClatUp) => Reaction::Unexpected("clat interface up while stopped"),
            (Stopped, UpstreamDown | ClatDown) => Reaction::Ignore,
            // STARTING
            (Starting, UpstreamUp) => Reaction::Unexpected("duplicate upstream up while starting"),
            (Starting, UpstreamDown) => Reaction::Enter(Stopping),
            (Starting, ClatUp) => Reaction::Enter(Running),
            (Starting, ClatDown) => Reaction::Ignore,
            // RUNNING
            (Running, UpstreamUp) => Reaction::Unexpected("upstream up while clat is running"),
            (Running, UpstreamDown | ClatDown) => Reaction::Enter(Stopping),
            (Running, ClatUp) => Reaction::Ignore,
            // STOPPING
            (Stopping, UpstreamUp) => Reaction::Unexpected("upstream up while stopping clat"),
            (Stopping, UpstreamDown | ClatUp | ClatDown) => Reaction::Ignore,
        }
    }

    /// Whether an upstream interface must be recorded in this state.
    pub fn holds_upstream(self) -> bool {
        self != ClatState::Stopped
    }
}

impl fmt::Display for ClatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClatState::Stopped => "stopped",
            ClatState::Starting => "starting",
            ClatState::Running => "running",
            ClatState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Lifecycle input. Events carry no payload; anything else is re-read from
/// the connectivity source when it is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClatEvent {
    UpstreamUp,
    UpstreamDown,
    ClatUp,
    ClatDown,
}

impl ClatEvent {
    pub const ALL: [ClatEvent; 4] = [
        ClatEvent::UpstreamUp,
        ClatEvent::UpstreamDown,
        ClatEvent::ClatUp,
        ClatEvent::ClatDown,
    ];
}

impl fmt::Display for ClatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClatEvent::UpstreamUp => "upstream_up",
            ClatEvent::UpstreamDown => "upstream_down",
            ClatEvent::ClatUp => "clat_up",
            ClatEvent::ClatDown => "clat_down",
        };
        f.write_str(name)
    }
}

/// Result of looking an event up in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Move to the state and run its entry action.
    Enter(ClatState),
    /// Expected no-op.
    Ignore,
    /// No-op worth a warning.
    Unexpected(&'static str),
}

/// Data protocol negotiated for the upstream attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum AddressFamily {
    #[serde(rename = "IP")]
    Ipv4,
    #[serde(rename = "IPV6")]
    Ipv6,
    #[serde(rename = "IPV4V6")]
    Ipv4v6,
}

impl AddressFamily {
    /// Only an IPv6-only upstream needs translation.
    pub fn is_ipv6_only(self) -> bool {
        self == AddressFamily::Ipv6
    }

    /// Parse the protocol-type label used by the radio layer.
    pub fn from_protocol_type(label: &str) -> Option<Self> {
        match label {
            "IP" => Some(AddressFamily::Ipv4),
            "IPV6" => Some(AddressFamily::Ipv6),
            "IPV4V6" => Some(AddressFamily::Ipv4v6),
            _ => None,
        }
    }
}

/// Snapshot of the primary mobile attachment as seen at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinkProperties {
    pub interface_name: Option<InterfaceName>,
    pub address_family: Option<AddressFamily>,
}

impl LinkProperties {
    pub fn new(interface_name: InterfaceName, address_family: AddressFamily) -> Self {
        Self {
            interface_name: Some(interface_name),
            address_family: Some(address_family),
        }
    }
}

/// State label carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StateLabel {
    Running,
    Stopping,
}

impl StateLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StateLabel::Running => "running",
            StateLabel::Stopping => "stopping",
        }
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle-state-changed announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: StateLabel,
    pub upstream_interface: InterfaceName,
    pub clat_interface: InterfaceName,
    pub timestamp_ms: i64,
}

impl StateChange {
    pub fn new(state: StateLabel, upstream: InterfaceName, clat: InterfaceName) -> Self {
        Self {
            state,
            upstream_interface: upstream,
            clat_interface: clat,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Diagnostic counters kept by the state machine.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub events_processed: u64,
    pub events_ignored: u64,
    pub daemon_starts: u64,
    pub daemon_stops: u64,
    pub daemon_failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_matches_lifecycle() {
        use ClatEvent::*;
        use ClatState::*;

        let expected = [
            (Stopped, UpstreamUp, Some(Starting)),
            (Stopped, UpstreamDown, None),
            (Stopped, ClatUp, None),
            (Stopped, ClatDown, None),
            (Starting, UpstreamUp, None),
            (Starting, UpstreamDown, Some(Stopping)),
            (Starting, ClatUp, Some(Running)),
            (Starting, ClatDown, None),
            (Running, UpstreamUp, None),
            (Running, UpstreamDown, Some(Stopping)),
            (Running, ClatUp, None),
            (Running, ClatDown, Some(Stopping)),
            (Stopping, UpstreamUp, None),
            (Stopping, UpstreamDown, None),
            (Stopping, ClatUp, None),
            (Stopping, ClatDown, None),
        ];

        for (state, event, target) in expected {
            let got = match state.on(event) {
                Reaction::Enter(next) => Some(next),
                Reaction::Ignore | Reaction::Unexpected(_) => None,
            };
            assert_eq!(got, target, "{} x {}", state, event);
        }
    }

    #[test]
    fn test_unexpected_events_are_flagged() {
        assert!(matches!(
            ClatState::Stopped.on(ClatEvent::ClatUp),
            Reaction::Unexpected(_)
        ));
        for state in [ClatState::Starting, ClatState::Running, ClatState::Stopping] {
            assert!(matches!(
                state.on(ClatEvent::UpstreamUp),
                Reaction::Unexpected(_)
            ));
        }
        assert_eq!(ClatState::Running.on(ClatEvent::ClatUp), Reaction::Ignore);
    }

    #[test]
    fn test_only_ipv6_is_ipv6_only() {
        assert!(AddressFamily::Ipv6.is_ipv6_only());
        assert!(!AddressFamily::Ipv4.is_ipv6_only());
        assert!(!AddressFamily::Ipv4v6.is_ipv6_only());
        assert_eq!(
            AddressFamily::from_protocol_type("IPV6"),
            Some(AddressFamily::Ipv6)
        );
        assert_eq!(AddressFamily::from_protocol_type("ipv6"), None);
    }

    #[test]
    fn test_state_change_serializes_labels() {
        let change = StateChange::new(
            StateLabel::Running,
            "rmnet0".parse().unwrap(),
            "clat".parse().unwrap(),
        );
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["upstream_interface"], "rmnet0");
        assert_eq!(json["clat_interface"], "clat");
    }
}
