//! BLE scan lifecycle.
//!
//! A [`Scanner`] owns the right to scan on one adapter; it hands out at
//! most one live [`ScanSession`] at a time. The session waits for the
//! adapter to power on, drives the radio scan, deduplicates discoveries,
//! and halts the radio on timeout, explicit stop, or loss of power.

use crate::domain::models::{AdapterState, DiscoveredPeripheral};
use crate::infrastructure::bluetooth::driver::{DriverError, DriverEvent, RadioDriver};
use std::collections::HashSet;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Service the target peripheral advertises.
    pub service: Uuid,
    /// Overall bound on the session, covering the wait for power as well
    /// as the active scan. `None` scans until stopped.
    pub timeout: Option<Duration>,
    /// Report a peripheral every time it advertises instead of once per
    /// session.
    pub allow_duplicates: bool,
}

impl ScanConfig {
    pub fn new(service: Uuid) -> Self {
        Self {
            service,
            timeout: None,
            allow_duplicates: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// The radio can never scan in this state (no hardware, or permission
    /// denied). Not retryable.
    #[error("adapter unavailable for scanning ({0})")]
    AdapterUnavailable(AdapterState),
    /// A session is already live on this scanner; the radio scan command
    /// was not issued a second time.
    #[error("a scan session is already active")]
    ScanInProgress,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Why a session stopped yielding discoveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEndReason {
    /// Explicitly stopped by the caller.
    Stopped,
    /// The configured timeout elapsed. Not an error: the sequence simply
    /// ends, possibly empty.
    TimedOut,
    /// The adapter left `PoweredOn`.
    AdapterLost,
    /// The radio rejected a scan command.
    Failed(DriverError),
}

/// Factory for scan sessions; enforces the one-active-scan invariant.
///
/// The exclusivity guard is per instance: build exactly one `Scanner`
/// per adapter. Two scanners over the same adapter could issue
/// overlapping radio scan commands.
pub struct Scanner {
    driver: Arc<dyn RadioDriver>,
    states: watch::Receiver<AdapterState>,
    active: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(driver: Arc<dyn RadioDriver>, states: watch::Receiver<AdapterState>) -> Self {
        Self {
            driver,
            states,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Begin a scan session. If the adapter is not yet powered on the
    /// session waits and starts the radio the instant it is.
    pub fn start(&self, config: ScanConfig) -> Result<ScanSession, ScanError> {
        let state = *self.states.borrow();
        if state.is_unavailable() {
            return Err(ScanError::AdapterUnavailable(state));
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ScanError::ScanInProgress);
        }

        info!("Starting scan session for service {}", config.service);

        let (discoveries_tx, discoveries_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (end_tx, end_rx) = watch::channel(None);

        let driver = self.driver.clone();
        let states = self.states.clone();
        let active = self.active.clone();
        let task = tokio::spawn(async move {
            let reason = drive_scan(&driver, states, &config, &discoveries_tx, stop_rx).await;
            info!("Scan session ended: {reason:?}");
            let _ = end_tx.send(Some(reason));
            active.store(false, Ordering::SeqCst);
            drop(discoveries_tx);
        });

        Ok(ScanSession {
            discoveries: discoveries_rx,
            stop_tx: Some(stop_tx),
            end_reason: end_rx,
            task,
        })
    }

    pub fn is_scanning(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// One bounded or explicitly-terminated search for advertising peripherals.
pub struct ScanSession {
    discoveries: mpsc::UnboundedReceiver<DiscoveredPeripheral>,
    stop_tx: Option<oneshot::Sender<()>>,
    end_reason: watch::Receiver<Option<ScanEndReason>>,
    task: JoinHandle<()>,
}

impl ScanSession {
    /// Next matched peripheral, in discovery order. `None` means the
    /// session has ended; see [`ScanSession::end_reason`].
    pub async fn next_discovery(&mut self) -> Option<DiscoveredPeripheral> {
        self.discoveries.recv().await
    }

    /// Stop the session. The underlying radio scan is halted before this
    /// returns, and no further discoveries are delivered.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Set once the session has ended.
    pub fn end_reason(&self) -> Option<ScanEndReason> {
        self.end_reason.borrow().clone()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        // A dropped session still halts the radio, just without waiting
        // for the acknowledgement.
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

async fn drive_scan(
    driver: &Arc<dyn RadioDriver>,
    mut states: watch::Receiver<AdapterState>,
    config: &ScanConfig,
    discoveries: &mpsc::UnboundedSender<DiscoveredPeripheral>,
    mut stop_rx: oneshot::Receiver<()>,
) -> ScanEndReason {
    let timeout = async {
        match config.timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(timeout);

    // Wait for power. Nothing is buffered and the radio is untouched
    // until the adapter reports PoweredOn.
    loop {
        let state = *states.borrow_and_update();
        if state.allows_scanning() {
            break;
        }
        if state.is_unavailable() {
            return ScanEndReason::AdapterLost;
        }
        tokio::select! {
            _ = &mut stop_rx => return ScanEndReason::Stopped,
            _ = &mut timeout => return ScanEndReason::TimedOut,
            changed = states.changed() => {
                if changed.is_err() {
                    return ScanEndReason::AdapterLost;
                }
            }
        }
    }

    // Subscribe only now: advertisements that reached the radio while it
    // was not powered on are never surfaced.
    let mut events = driver.subscribe();
    if let Err(e) = driver.start_scan(config.service).await {
        warn!("Radio refused to start scan: {e}");
        return ScanEndReason::Failed(e);
    }

    let mut seen: HashSet<_> = HashSet::new();
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let _ = driver.stop_scan().await;
                return ScanEndReason::Stopped;
            }
            _ = &mut timeout => {
                let _ = driver.stop_scan().await;
                return ScanEndReason::TimedOut;
            }
            changed = states.changed() => {
                if changed.is_err() || !states.borrow_and_update().allows_scanning() {
                    // Power is gone: halt the radio immediately.
                    let _ = driver.stop_scan().await;
                    return ScanEndReason::AdapterLost;
                }
            }
            event = events.recv() => match event {
                Ok(DriverEvent::PeripheralDiscovered(peripheral)) => {
                    if config.allow_duplicates || seen.insert(peripheral.id.clone()) {
                        info!(
                            "Discovered peripheral {} (rssi {:?})",
                            peripheral.id, peripheral.rssi
                        );
                        let _ = discoveries.send(peripheral);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Scan session lagged, missed {missed} radio events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = driver.stop_scan().await;
                    return ScanEndReason::Failed(DriverError::Backend(
                        "radio event stream closed".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{peripheral, DriverCall, MockRadioDriver};
    use crate::infrastructure::bluetooth::monitor::AdapterMonitor;

    const SERVICE: Uuid = Uuid::from_u128(0x99f54e09_8916_4083_adce_bcd996e9510e);

    async fn scanner_with(
        state: AdapterState,
    ) -> (Arc<MockRadioDriver>, AdapterMonitor, Scanner) {
        let driver = MockRadioDriver::new(state);
        let monitor = AdapterMonitor::start(driver.clone()).await;
        let scanner = Scanner::new(driver.clone(), monitor.observe_state());
        (driver, monitor, scanner)
    }

    /// Let spawned session tasks catch up with injected events.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_no_discoveries_while_not_powered_on() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOff).await;
        let mut session = scanner.start(ScanConfig::new(SERVICE)).unwrap();

        driver.discover(peripheral("AA:BB:CC:DD:EE:FF"));
        settle().await;
        assert!(session.discoveries.try_recv().is_err());
        // The radio was never asked to scan either.
        assert!(driver.calls().is_empty());

        driver.set_adapter_state(AdapterState::PoweredOn);
        settle().await;
        driver.discover(peripheral("AA:BB:CC:DD:EE:FF"));
        let found = session.next_discovery().await.unwrap();
        assert_eq!(found.id.as_str(), "AA:BB:CC:DD:EE:FF");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_second_start_does_not_double_issue_radio_scan() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        let session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        settle().await;

        assert!(matches!(
            scanner.start(ScanConfig::new(SERVICE)),
            Err(ScanError::ScanInProgress)
        ));
        assert_eq!(driver.calls(), vec![DriverCall::StartScan(SERVICE)]);

        session.stop().await;
        // Once the session is gone a new one may start.
        let session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_radio_before_returning() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        let session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        settle().await;

        session.stop().await;
        assert_eq!(
            driver.calls(),
            vec![DriverCall::StartScan(SERVICE), DriverCall::StopScan]
        );
    }

    #[tokio::test]
    async fn test_unavailable_adapter_rejects_scan() {
        let (_driver, _monitor, scanner) = scanner_with(AdapterState::Unauthorized).await;
        let err = scanner
            .start(ScanConfig::new(SERVICE))
            .err()
            .expect("scan should be rejected");
        assert!(matches!(
            err,
            ScanError::AdapterUnavailable(AdapterState::Unauthorized)
        ));
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_power_loss_stops_radio_and_ends_session() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        let mut session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        settle().await;

        driver.set_adapter_state(AdapterState::PoweredOff);
        assert!(session.next_discovery().await.is_none());
        assert_eq!(session.end_reason(), Some(ScanEndReason::AdapterLost));
        assert_eq!(
            driver.calls(),
            vec![DriverCall::StartScan(SERVICE), DriverCall::StopScan]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_empty_session() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        let mut session = scanner
            .start(ScanConfig::new(SERVICE).with_timeout(Duration::from_secs(2)))
            .unwrap();

        let started = tokio::time::Instant::now();
        assert!(session.next_discovery().await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(session.end_reason(), Some(ScanEndReason::TimedOut));
        assert!(driver.calls().contains(&DriverCall::StopScan));
    }

    #[tokio::test]
    async fn test_scan_refusal_ends_session_with_driver_error() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        driver.refuse_next_start_scan(DriverError::Backend("scan refused".to_string()));

        let mut session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        assert!(session.next_discovery().await.is_none());
        assert_eq!(
            session.end_reason(),
            Some(ScanEndReason::Failed(DriverError::Backend(
                "scan refused".to_string()
            )))
        );
        // The failed session released the scanner.
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_duplicate_advertisements_reported_once() {
        let (driver, _monitor, scanner) = scanner_with(AdapterState::PoweredOn).await;
        let mut session = scanner.start(ScanConfig::new(SERVICE)).unwrap();
        settle().await;

        driver.discover(peripheral("AA:BB:CC:DD:EE:FF"));
        driver.discover(peripheral("AA:BB:CC:DD:EE:FF"));
        driver.discover(peripheral("11:22:33:44:55:66"));
        settle().await;

        assert_eq!(
            session.next_discovery().await.unwrap().id.as_str(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            session.next_discovery().await.unwrap().id.as_str(),
            "11:22:33:44:55:66"
        );
        assert!(session.discoveries.try_recv().is_err());

        session.stop().await;
    }
}
