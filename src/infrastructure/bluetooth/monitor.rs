//! Adapter state observation.
//!
//! Wraps the driver's state notifications in a `tokio::sync::watch`
//! channel, so every observer immediately sees the current state followed
//! by subsequent transitions (replay-latest semantics).

use crate::domain::models::AdapterState;
use crate::infrastructure::bluetooth::driver::{DriverEvent, RadioDriver};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct AdapterMonitor {
    state_rx: watch::Receiver<AdapterState>,
    task: JoinHandle<()>,
}

impl AdapterMonitor {
    /// Seed the monitor with the radio's current state and start following
    /// its transitions.
    pub async fn start(driver: Arc<dyn RadioDriver>) -> Self {
        // Subscribe before the initial query so no transition is missed.
        let mut events = driver.subscribe();
        let initial = driver.adapter_state().await;
        let (state_tx, state_rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DriverEvent::AdapterStateChanged(state)) => {
                        debug!("Adapter state changed: {state}");
                        state_tx.send_if_modified(|current| {
                            if *current != state {
                                *current = state;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Adapter monitor lagged, missed {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { state_rx, task }
    }

    /// A fresh observer of adapter state transitions. The receiver holds
    /// the current state at all times; `changed()` wakes on transitions.
    pub fn observe_state(&self) -> watch::Receiver<AdapterState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> AdapterState {
        *self.state_rx.borrow()
    }
}

impl Drop for AdapterMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::MockRadioDriver;

    #[tokio::test]
    async fn test_observer_sees_current_state_immediately() {
        let driver = MockRadioDriver::new(AdapterState::PoweredOff);
        let monitor = AdapterMonitor::start(driver.clone()).await;

        assert_eq!(monitor.current(), AdapterState::PoweredOff);
        // A late observer starts from the latest state, not from the
        // beginning of history.
        let rx = monitor.observe_state();
        assert_eq!(*rx.borrow(), AdapterState::PoweredOff);
    }

    #[tokio::test]
    async fn test_transitions_are_delivered_in_order() {
        let driver = MockRadioDriver::new(AdapterState::Unknown);
        let monitor = AdapterMonitor::start(driver.clone()).await;
        let mut rx = monitor.observe_state();

        driver.set_adapter_state(AdapterState::PoweredOn);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AdapterState::PoweredOn);

        driver.set_adapter_state(AdapterState::PoweredOff);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AdapterState::PoweredOff);
    }

    #[tokio::test]
    async fn test_restartable_observation() {
        let driver = MockRadioDriver::new(AdapterState::PoweredOn);
        let monitor = AdapterMonitor::start(driver.clone()).await;

        // Dropping one observer must not disturb the next.
        drop(monitor.observe_state());
        let mut rx = monitor.observe_state();
        driver.set_adapter_state(AdapterState::Resetting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AdapterState::Resetting);
    }
}
