//! Wake timer for the orchestrator.
//!
//! The heartbeat sleeps for a fixed interval, runs one cycle, and re-arms the timer from the
//! end of that cycle. `wake_now` cuts the current sleep short. Because the loop awaits each
//! cycle before selecting again, two cycles never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::orchestrator::{CycleOrchestrator, CycleResult};

pub type SharedOrchestrator = Arc<Mutex<CycleOrchestrator>>;

pub struct CycleHeartbeat;

impl CycleHeartbeat {
    /// Spawns the heartbeat loop on the current tokio runtime.
    pub fn spawn(orchestrator: SharedOrchestrator, interval: Duration) -> WakeHandle {
        // Capacity 1: wake requests made while one is pending coalesce.
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (result_tx, result_rx) = watch::channel::<Option<CycleResult>>(None);

        let join = tokio::spawn(async move {
            info!(
                target: "pagi::heartbeat",
                interval_secs = interval.as_secs_f64(),
                "Heartbeat started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        debug!(target: "pagi::heartbeat", "Timer fired");
                    }
                    Some(()) = wake_rx.recv() => {
                        debug!(target: "pagi::heartbeat", "Wake requested");
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                let result = {
                    let mut guard = orchestrator.lock().await;
                    guard.evaluate_cycle().await
                };
                let _ = result_tx.send(Some(result));
            }
            info!(target: "pagi::heartbeat", "Heartbeat stopped");
        });

        WakeHandle {
            wake_tx,
            shutdown_tx,
            results: result_rx,
            join,
        }
    }
}

/// Control surface for a running heartbeat.
pub struct WakeHandle {
    wake_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    results: watch::Receiver<Option<CycleResult>>,
    join: JoinHandle<()>,
}

impl WakeHandle {
    /// Runs a cycle as soon as the current one (if any) finishes, and reschedules the timer.
    /// Returns false when a wake is already pending or the heartbeat has stopped.
    pub fn wake_now(&self) -> bool {
        self.wake_tx.try_send(()).is_ok()
    }

    /// Receiver that observes every finished cycle's result.
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleResult>> {
        self.results.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stops the loop after any in-flight cycle completes.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
