//! Connection establishment.
//!
//! [`ConnectionManager`] drives a full pairing attempt: scan for the
//! configured service, take the first match, stop the scan, and race the
//! connection handshake against the caller's deadline. Success yields a
//! [`ConnectionHandle`] that tracks the link until it drops.

use crate::domain::models::{
    AdapterState, DiscoveredPeripheral, LinkState, PairingPhase, PeripheralId,
};
use crate::infrastructure::bluetooth::driver::{DriverError, DriverEvent, RadioDriver};
use crate::infrastructure::bluetooth::monitor::AdapterMonitor;
use crate::infrastructure::bluetooth::scanner::{
    ScanConfig, ScanEndReason, ScanError, Scanner,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PairingError {
    /// Radio unsupported or unauthorized; retrying will not help.
    #[error("adapter unavailable ({0})")]
    AdapterUnavailable(AdapterState),
    /// The adapter left `PoweredOn` mid-attempt. Recoverable once power
    /// returns.
    #[error("adapter powered off during pairing")]
    AdapterPoweredOff,
    /// The scan ended without a match. Recoverable; the caller chooses
    /// whether and when to retry.
    #[error("no matching peripheral found before the deadline")]
    NoDeviceFound,
    /// The handshake exceeded the deadline. Recoverable.
    #[error("connection handshake timed out")]
    ConnectTimeout,
    /// The caller cancelled the attempt.
    #[error("pairing attempt cancelled")]
    Cancelled,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Coordinates scan and connect against a single adapter.
///
/// All failure modes come back as values; the manager never retries on
/// its own. State machine per attempt:
/// `idle → scanning → connecting → {connected, failed}`.
pub struct ConnectionManager {
    driver: Arc<dyn RadioDriver>,
    scanner: Scanner,
    states: watch::Receiver<AdapterState>,
    service: Uuid,
    phase_tx: watch::Sender<PairingPhase>,
    cancel_tx: watch::Sender<bool>,
    /// Serializes attempts: at most one handshake in flight per manager.
    attempt: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn RadioDriver>, monitor: &AdapterMonitor, service: Uuid) -> Self {
        let scanner = Scanner::new(driver.clone(), monitor.observe_state());
        let (phase_tx, _) = watch::channel(PairingPhase::Idle);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            driver,
            scanner,
            states: monitor.observe_state(),
            service,
            phase_tx,
            cancel_tx,
            attempt: Mutex::new(()),
        }
    }

    /// Observe the phase of the current (or most recent) attempt.
    pub fn observe_phase(&self) -> watch::Receiver<PairingPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> PairingPhase {
        *self.phase_tx.borrow()
    }

    /// Abort the in-flight attempt, if any. The radio scan or handshake
    /// is stopped before the cancelled call resolves.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Scan for the configured service, connect to the first match, and
    /// resolve within `timeout`.
    ///
    /// Exactly one radio connect attempt is issued per call, and the scan
    /// is always stopped before it. The deadline covers the whole attempt:
    /// an empty scan resolves [`PairingError::NoDeviceFound`] once the
    /// deadline passes, never earlier.
    pub async fn connect_to_first_match(
        &self,
        timeout: Duration,
    ) -> Result<ConnectionHandle, PairingError> {
        let _attempt = self.attempt.lock().await;
        self.cancel_tx.send_replace(false);
        let mut cancel_rx = self.cancel_tx.subscribe();

        let result = self.run_attempt(timeout, &mut cancel_rx).await;
        match &result {
            Ok(handle) => {
                info!("Connected to {}", handle.id());
                self.phase_tx.send_replace(PairingPhase::Connected);
            }
            Err(e) => {
                warn!("Pairing attempt failed: {e}");
                self.phase_tx.send_replace(PairingPhase::Failed);
            }
        }
        result
    }

    async fn run_attempt(
        &self,
        timeout: Duration,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<ConnectionHandle, PairingError> {
        let deadline = Instant::now() + timeout;

        self.phase_tx.send_replace(PairingPhase::Scanning);
        let config = ScanConfig::new(self.service).with_timeout(timeout);
        let mut session = self.scanner.start(config).map_err(|e| match e {
            ScanError::AdapterUnavailable(state) => PairingError::AdapterUnavailable(state),
            ScanError::ScanInProgress => {
                PairingError::Driver(DriverError::Backend("scan already active".to_string()))
            }
            ScanError::Driver(e) => PairingError::Driver(e),
        })?;

        let first = tokio::select! {
            found = session.next_discovery() => match found {
                Some(peripheral) => peripheral,
                None => {
                    return Err(match session.end_reason() {
                        Some(ScanEndReason::AdapterLost) => {
                            let state = *self.states.borrow();
                            if state.is_unavailable() {
                                PairingError::AdapterUnavailable(state)
                            } else {
                                PairingError::AdapterPoweredOff
                            }
                        }
                        Some(ScanEndReason::Failed(e)) => PairingError::Driver(e),
                        _ => PairingError::NoDeviceFound,
                    });
                }
            },
            _ = cancelled(cancel_rx) => {
                session.stop().await;
                return Err(PairingError::Cancelled);
            }
        };

        // Only one connection attempt in flight: the scan is torn down
        // before the radio is asked to connect.
        session.stop().await;

        self.phase_tx.send_replace(PairingPhase::Connecting);
        info!("Connecting to {}", first.id);

        // Subscribe before initiating so the completion event cannot be
        // missed.
        let mut events = self.driver.subscribe();
        self.driver.connect(&first.id).await?;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = self.driver.disconnect(&first.id).await;
                    return Err(PairingError::ConnectTimeout);
                }
                _ = cancelled(cancel_rx) => {
                    let _ = self.driver.disconnect(&first.id).await;
                    return Err(PairingError::Cancelled);
                }
                event = events.recv() => match event {
                    Ok(DriverEvent::ConnectSucceeded(id)) if id == first.id => {
                        break;
                    }
                    Ok(DriverEvent::ConnectFailed { id, reason }) if id == first.id => {
                        return Err(PairingError::Driver(DriverError::Backend(reason)));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Connect wait lagged, missed {missed} radio events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(PairingError::Driver(DriverError::Backend(
                            "radio event stream closed".to_string(),
                        )));
                    }
                }
            }
        }

        // Hand the live subscription over so a disconnect raised right
        // after the handshake cannot slip by unobserved.
        Ok(ConnectionHandle::new(self.driver.clone(), first, events))
    }
}

/// A live link to one peripheral.
///
/// The link state only moves forward: once `Disconnected` is observed no
/// further transitions occur, and a fresh
/// [`ConnectionManager::connect_to_first_match`] call is needed to
/// reconnect. A failed handshake never produces a handle; those failures
/// surface as [`PairingError`].
pub struct ConnectionHandle {
    peripheral: DiscoveredPeripheral,
    driver: Arc<dyn RadioDriver>,
    state_tx: Arc<watch::Sender<LinkState>>,
    watch_task: JoinHandle<()>,
}

impl ConnectionHandle {
    fn new(
        driver: Arc<dyn RadioDriver>,
        peripheral: DiscoveredPeripheral,
        mut events: broadcast::Receiver<DriverEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Connected);
        let state_tx = Arc::new(state_tx);

        let id = peripheral.id.clone();
        let tx = state_tx.clone();
        // Watch for the link dropping; report it exactly once, then stop
        // listening.
        let watch_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DriverEvent::PeripheralDisconnected(dropped)) if dropped == id => {
                        info!("Link to {id} dropped");
                        mark_disconnected(&tx);
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            peripheral,
            driver,
            state_tx,
            watch_task,
        }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.peripheral.id
    }

    pub fn peripheral(&self) -> &DiscoveredPeripheral {
        &self.peripheral
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Observe link state transitions (replay-latest).
    pub fn observe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Tear the link down and release the handle.
    pub async fn close(self) {
        self.watch_task.abort();
        if self.state() == LinkState::Connected {
            let _ = self.driver.disconnect(&self.peripheral.id).await;
            mark_disconnected(&self.state_tx);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.watch_task.abort();
    }
}

/// Resolves once the cancel flag is raised; checks the value rather than
/// the change mark so a flag raised moments before the wait still fires.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Manager gone; nothing can cancel this attempt anymore.
            std::future::pending::<()>().await;
        }
    }
}

fn mark_disconnected(tx: &watch::Sender<LinkState>) {
    tx.send_if_modified(|state| {
        if *state == LinkState::Connected {
            *state = LinkState::Disconnected;
            true
        } else {
            false
        }
    });
}
