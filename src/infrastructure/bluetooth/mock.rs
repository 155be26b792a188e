//! Scriptable in-memory radio driver.
//!
//! Stands in for a real BLE stack in tests and demos: adapter state,
//! discoveries, and connect outcomes are injected by the test, and every
//! radio command is recorded so ordering can be asserted.

use crate::domain::models::{AdapterState, DiscoveredPeripheral, PeripheralId};
use crate::infrastructure::bluetooth::driver::{DriverError, DriverEvent, RadioDriver};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A radio command issued against the mock, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    StartScan(Uuid),
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
}

/// How the mock answers a `connect` request.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Emit `ConnectSucceeded` immediately.
    Succeed,
    /// Emit `ConnectFailed` immediately with this reason.
    Fail(String),
    /// Emit nothing; the test drives the outcome via
    /// [`MockRadioDriver::complete_connect`] or lets the caller time out.
    Manual,
}

pub struct MockRadioDriver {
    state: Mutex<AdapterState>,
    connect_script: Mutex<ConnectScript>,
    scan_refusal: Mutex<Option<DriverError>>,
    calls: Mutex<Vec<DriverCall>>,
    events: broadcast::Sender<DriverEvent>,
}

impl MockRadioDriver {
    pub fn new(initial: AdapterState) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(initial),
            connect_script: Mutex::new(ConnectScript::Succeed),
            scan_refusal: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn set_connect_script(&self, script: ConnectScript) {
        *self.connect_script.lock().unwrap() = script;
    }

    /// Make the next `start_scan` fail with this error.
    pub fn refuse_next_start_scan(&self, error: DriverError) {
        *self.scan_refusal.lock().unwrap() = Some(error);
    }

    /// Change the adapter state and notify subscribers.
    pub fn set_adapter_state(&self, state: AdapterState) {
        *self.state.lock().unwrap() = state;
        let _ = self.events.send(DriverEvent::AdapterStateChanged(state));
    }

    /// Inject an advertisement, whether or not a scan is running. The scan
    /// layer is responsible for ignoring it when it should.
    pub fn discover(&self, peripheral: DiscoveredPeripheral) {
        let _ = self
            .events
            .send(DriverEvent::PeripheralDiscovered(peripheral));
    }

    /// Finish a `Manual` handshake successfully.
    pub fn complete_connect(&self, id: &PeripheralId) {
        let _ = self.events.send(DriverEvent::ConnectSucceeded(id.clone()));
    }

    /// Drop an established link.
    pub fn drop_link(&self, id: &PeripheralId) {
        let _ = self
            .events
            .send(DriverEvent::PeripheralDisconnected(id.clone()));
    }

    /// Radio commands issued so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Convenience builder for a discovery event.
pub fn peripheral(id: &str) -> DiscoveredPeripheral {
    DiscoveredPeripheral {
        id: PeripheralId::new(id),
        name: Some("Umbrella".to_string()),
        rssi: Some(-58),
        discovered_at: Instant::now(),
    }
}

#[async_trait]
impl RadioDriver for MockRadioDriver {
    async fn adapter_state(&self) -> AdapterState {
        *self.state.lock().unwrap()
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DriverError> {
        self.record(DriverCall::StartScan(service));
        if let Some(error) = self.scan_refusal.lock().unwrap().take() {
            return Err(error);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DriverError> {
        self.record(DriverCall::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        self.record(DriverCall::Connect(id.clone()));
        let script = self.connect_script.lock().unwrap().clone();
        match script {
            ConnectScript::Succeed => {
                let _ = self.events.send(DriverEvent::ConnectSucceeded(id.clone()));
            }
            ConnectScript::Fail(reason) => {
                let _ = self.events.send(DriverEvent::ConnectFailed {
                    id: id.clone(),
                    reason,
                });
            }
            ConnectScript::Manual => {}
        }
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        self.record(DriverCall::Disconnect(id.clone()));
        Ok(())
    }
}
