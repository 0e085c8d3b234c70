//! Background retry scheduler.
//!
//! Sweeps the retry queue on a fixed interval until shutdown is signalled.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::services::Pipeline;

/// Handle to the running retry worker.
#[derive(Debug)]
pub struct RetryWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetryWorker {
    /// Spawn the worker on the current runtime.
    #[must_use]
    pub fn spawn(pipeline: Pipeline, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval = ?interval, "Starting retry worker");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let cycle_start = Instant::now();
                match pipeline.process_due_retries(Utc::now()).await {
                    Ok(sweep) if sweep.processed > 0 => info!(
                        processed = sweep.processed,
                        succeeded = sweep.succeeded,
                        requeued = sweep.requeued,
                        dead_lettered = sweep.dead_lettered,
                        duration_ms = cycle_start.elapsed().as_millis(),
                        "Retry sweep completed"
                    ),
                    Ok(_) => debug!("No retries due"),
                    Err(e) => error!(error = %e, "Retry sweep failed"),
                }
            }

            info!("Retry worker stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the worker to stop and wait for the current sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Retry worker task failed");
        }
    }
}
