//! btleplug-backed radio driver.
//!
//! Adapts the first host adapter btleplug reports into the
//! [`RadioDriver`] capability. A single pump task translates the
//! adapter's event stream into [`DriverEvent`]s; handshake outcomes are
//! reported by the per-connect task instead, so each attempt has exactly
//! one result.

use crate::domain::models::{AdapterState, DiscoveredPeripheral, PeripheralId};
use crate::infrastructure::bluetooth::driver::{DriverError, DriverEvent, RadioDriver};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct BtleplugDriver {
    adapter: Adapter,
    events: broadcast::Sender<DriverEvent>,
    /// Discovered peripherals by our string id, so connect/disconnect can
    /// recover the platform handle.
    known: Arc<Mutex<HashMap<String, btleplug::platform::PeripheralId>>>,
    /// Service filter of the scan in progress; discoveries not matching
    /// it are dropped even if the platform surfaces them.
    scan_filter: Arc<Mutex<Option<Uuid>>>,
    pump: JoinHandle<()>,
}

impl BtleplugDriver {
    pub async fn new() -> Result<Arc<Self>, DriverError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::Backend("no BLE adapter found".to_string()))?;
        match adapter.adapter_info().await {
            Ok(info) => info!("Using BLE adapter: {info}"),
            Err(e) => warn!("Could not read adapter info: {e}"),
        }

        let (events, _) = broadcast::channel(256);
        let known = Arc::new(Mutex::new(HashMap::new()));
        let scan_filter = Arc::new(Mutex::new(None));

        let mut stream = adapter.events().await.map_err(backend)?;
        let pump = tokio::spawn({
            let adapter = adapter.clone();
            let events = events.clone();
            let known = Arc::clone(&known);
            let scan_filter = Arc::clone(&scan_filter);
            async move {
                while let Some(event) = stream.next().await {
                    match event {
                        CentralEvent::StateUpdate(state) => {
                            let state = map_state(state);
                            debug!("Adapter state update: {state}");
                            let _ = events.send(DriverEvent::AdapterStateChanged(state));
                        }
                        CentralEvent::DeviceDiscovered(id) => {
                            let wanted = *scan_filter.lock().unwrap();
                            match describe(&adapter, &id, wanted).await {
                                Some(peripheral) => {
                                    known
                                        .lock()
                                        .unwrap()
                                        .insert(peripheral.id.as_str().to_string(), id);
                                    let _ = events
                                        .send(DriverEvent::PeripheralDiscovered(peripheral));
                                }
                                None => debug!("Ignoring non-matching peripheral {id}"),
                            }
                        }
                        CentralEvent::DeviceDisconnected(id) => {
                            let _ = events.send(DriverEvent::PeripheralDisconnected(
                                PeripheralId::new(id.to_string()),
                            ));
                        }
                        _ => {}
                    }
                }
                debug!("Adapter event stream ended");
            }
        });

        Ok(Arc::new(Self {
            adapter,
            events,
            known,
            scan_filter,
            pump,
        }))
    }

    fn platform_id(
        &self,
        id: &PeripheralId,
    ) -> Result<btleplug::platform::PeripheralId, DriverError> {
        self.known
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| DriverError::UnknownPeripheral(id.clone()))
    }
}

impl Drop for BtleplugDriver {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl RadioDriver for BtleplugDriver {
    async fn adapter_state(&self) -> AdapterState {
        match self.adapter.adapter_state().await {
            Ok(state) => map_state(state),
            Err(e) => {
                warn!("Could not query adapter state: {e}");
                AdapterState::Unknown
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DriverError> {
        *self.scan_filter.lock().unwrap() = Some(service);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(backend)
    }

    async fn stop_scan(&self) -> Result<(), DriverError> {
        *self.scan_filter.lock().unwrap() = None;
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        let platform_id = self.platform_id(id)?;
        let peripheral = self
            .adapter
            .peripheral(&platform_id)
            .await
            .map_err(backend)?;

        let events = self.events.clone();
        let id = id.clone();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    let _ = events.send(DriverEvent::ConnectSucceeded(id));
                }
                Err(e) => {
                    let _ = events.send(DriverEvent::ConnectFailed {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), DriverError> {
        let platform_id = self.platform_id(id)?;
        let peripheral = self
            .adapter
            .peripheral(&platform_id)
            .await
            .map_err(backend)?;
        peripheral.disconnect().await.map_err(backend)
    }
}

fn backend(e: btleplug::Error) -> DriverError {
    DriverError::Backend(e.to_string())
}

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::Unknown => AdapterState::Unknown,
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
    }
}

/// Pull name/rssi for a freshly discovered peripheral, filtering on the
/// advertised services when a scan filter is in force.
async fn describe(
    adapter: &Adapter,
    id: &btleplug::platform::PeripheralId,
    wanted: Option<Uuid>,
) -> Option<DiscoveredPeripheral> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    if let Some(service) = wanted {
        if !properties.services.contains(&service) {
            return None;
        }
    }

    Some(DiscoveredPeripheral {
        id: PeripheralId::new(id.to_string()),
        name: properties.local_name,
        rssi: properties.rssi,
        discovered_at: Instant::now(),
    })
}
