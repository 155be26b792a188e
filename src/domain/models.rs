//! Core data model for BLE discovery and pairing.

use std::fmt;
use std::time::Instant;

/// Power/availability state of the host BLE radio.
///
/// Transitions arrive asynchronously from the radio driver. Only
/// [`AdapterState::PoweredOn`] permits scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Whether a scan may run in this state.
    pub fn allows_scanning(self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }

    /// Whether the radio is permanently out of reach for this process
    /// (missing hardware or denied permission). These states never
    /// transition back to `PoweredOn`.
    pub fn is_unavailable(self) -> bool {
        matches!(self, AdapterState::Unsupported | AdapterState::Unauthorized)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::PoweredOff => "powered off",
            AdapterState::PoweredOn => "powered on",
        };
        f.write_str(name)
    }
}

/// Opaque identifier for a peripheral, as reported by the radio driver.
///
/// On most platforms this is a MAC address (`AA:BB:CC:DD:EE:FF`); on macOS
/// it is a platform-assigned UUID. Treated as an opaque string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One advertising device matched during a scan session.
///
/// Created on advertisement receipt, discarded at the end of the session
/// unless promoted to a connection attempt.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    /// Signal strength in dBm, when the driver reports one.
    pub rssi: Option<i16>,
    pub discovered_at: Instant,
}

/// State of an established link. Transitions only move forward:
/// `Connected` → `Disconnected` is terminal, and a fresh connection
/// attempt is required to get a new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Observable phase of a pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_gating() {
        assert!(AdapterState::PoweredOn.allows_scanning());
        assert!(!AdapterState::PoweredOff.allows_scanning());
        assert!(!AdapterState::Unknown.allows_scanning());

        assert!(AdapterState::Unsupported.is_unavailable());
        assert!(AdapterState::Unauthorized.is_unavailable());
        assert!(!AdapterState::PoweredOff.is_unavailable());
    }

    #[test]
    fn test_peripheral_id_display() {
        let id = PeripheralId::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
    }
}
