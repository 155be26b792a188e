//! Radio driver abstraction.
//!
//! The physical BLE radio is modeled as an opaque capability behind the
//! [`RadioDriver`] trait: commands go in as async calls, completions come
//! back as [`DriverEvent`]s on a broadcast channel. The production backend
//! lives in [`super::platform`]; tests use [`super::mock::MockRadioDriver`].

use crate::domain::models::{AdapterState, DiscoveredPeripheral, PeripheralId};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Asynchronous notification from the radio.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    AdapterStateChanged(AdapterState),
    PeripheralDiscovered(DiscoveredPeripheral),
    /// Connection handshake finished for a peripheral we asked to connect.
    ConnectSucceeded(PeripheralId),
    ConnectFailed {
        id: PeripheralId,
        reason: String,
    },
    /// An established link dropped.
    PeripheralDisconnected(PeripheralId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("radio backend error: {0}")]
    Backend(String),
    #[error("unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),
}

/// Capability surface of the host BLE radio.
///
/// Commands are serialized by the callers (one scan, one connect attempt at
/// a time); the driver itself does not arbitrate contention. `connect`
/// initiates the handshake — its outcome arrives as
/// [`DriverEvent::ConnectSucceeded`] or [`DriverEvent::ConnectFailed`].
#[async_trait]
pub trait RadioDriver: Send + Sync + 'static {
    /// Current adapter state, as last reported by the radio.
    async fn adapter_state(&self) -> AdapterState;

    /// Subscribe to radio notifications. Every subscriber sees every event
    /// from the moment of subscription.
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;

    /// Start an active scan filtered to peripherals advertising `service`.
    async fn start_scan(&self, service: Uuid) -> Result<(), DriverError>;

    /// Halt the radio scan. Idempotent.
    async fn stop_scan(&self) -> Result<(), DriverError>;

    /// Initiate a connection handshake with a previously discovered
    /// peripheral.
    async fn connect(&self, id: &PeripheralId) -> Result<(), DriverError>;

    /// Tear down a link or abort an in-flight handshake.
    async fn disconnect(&self, id: &PeripheralId) -> Result<(), DriverError>;
}
