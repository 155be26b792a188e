//! Bluetooth Module
//!
//! BLE discovery-and-connection core for the Umbrella wearable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │  (scan → first match → stop scan → handshake → handle)   │
//! └───────────┬──────────────────────────────┬──────────────┘
//!             │                              │
//!             ▼                              ▼
//! ┌────────────────────┐          ┌────────────────────┐
//! │      Scanner       │          │   AdapterMonitor   │
//! │                    │◀─────────│                    │
//! │ - power gating     │  states  │ - replay-latest    │
//! │ - dedup, timeout   │          │   adapter state    │
//! └─────────┬──────────┘          └─────────┬──────────┘
//!           │                               │
//!           ▼                               ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │               RadioDriver (trait)                        │
//! │   platform: btleplug        mock: scriptable in-memory   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Umbrella service identifiers
//! - [`driver`] - radio capability trait and event model
//! - [`monitor`] - adapter state observation
//! - [`scanner`] - scan session lifecycle
//! - [`connection`] - connection establishment and link tracking
//! - [`platform`] - btleplug-backed production driver
//! - [`mock`] - scriptable driver for tests and demos

pub mod connection;
pub mod driver;
pub mod mock;
pub mod monitor;
pub mod platform;
pub mod protocol;
pub mod scanner;

pub use connection::{ConnectionHandle, ConnectionManager, PairingError};
pub use driver::{DriverError, DriverEvent, RadioDriver};
pub use monitor::AdapterMonitor;
pub use scanner::{ScanConfig, ScanEndReason, ScanError, ScanSession, Scanner};
