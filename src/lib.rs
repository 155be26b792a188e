//! Umbrella Link
//!
//! BLE discovery-and-connection core for the Umbrella wearable. The
//! library owns adapter-state observation, scan lifecycle, and connection
//! establishment; rendering and navigation belong to whatever front end
//! drives it (the bundled binary is a minimal CLI collaborator).

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    AdapterState, DiscoveredPeripheral, LinkState, PairingPhase, PeripheralId,
};
pub use domain::settings::{Settings, SettingsService};
pub use infrastructure::bluetooth::{
    AdapterMonitor, ConnectionHandle, ConnectionManager, PairingError, RadioDriver, ScanConfig,
    ScanEndReason, ScanError, ScanSession, Scanner,
};
pub use infrastructure::bluetooth::platform::BtleplugDriver;
