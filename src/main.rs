use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};
use umbrella_link::infrastructure::bluetooth::protocol;
use umbrella_link::infrastructure::logging;
use umbrella_link::{
    AdapterMonitor, BtleplugDriver, ConnectionManager, LinkState, PairingPhase, RadioDriver,
    SettingsService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;
    let settings = settings_service.get().clone();
    let _logging_guard = logging::init_logger(&settings.log_settings)?;

    info!("Starting Umbrella Link");

    let service = protocol::parse_service_uuid(&settings.ble_service_uuid)?;
    let driver: Arc<dyn RadioDriver> = BtleplugDriver::new()
        .await
        .context("Failed to open BLE adapter")?;
    let monitor = AdapterMonitor::start(driver.clone()).await;
    info!("Adapter state: {}", monitor.current());

    let manager = Arc::new(ConnectionManager::new(driver, &monitor, service));

    // Render phase transitions while the attempt runs.
    let mut phases = manager.observe_phase();
    let render = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            info!("Pairing phase: {phase:?}");
            if matches!(phase, PairingPhase::Connected | PairingPhase::Failed) {
                break;
            }
        }
    });

    let timeout = Duration::from_millis(settings.connect_timeout_ms);
    let mut attempt = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect_to_first_match(timeout).await }
    });

    let result = tokio::select! {
        result = &mut attempt => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling pairing attempt");
            manager.cancel();
            // Wait for the radio to be released before exiting.
            let _ = attempt.await;
            render.abort();
            return Ok(());
        }
    };
    let _ = render.await;

    match result {
        Ok(handle) => {
            info!("Connected to umbrella {}", handle.id());

            // Hold the link until it drops or the user quits.
            let mut link = handle.observe_state();
            tokio::select! {
                _ = link.changed() => {
                    if *link.borrow() == LinkState::Disconnected {
                        info!("Link dropped by peer");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Closing link");
                }
            }
            handle.close().await;
            Ok(())
        }
        Err(e) => {
            error!("Pairing failed: {e}");
            Err(e.into())
        }
    }
}
