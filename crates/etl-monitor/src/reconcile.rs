//! Periodic reconciliation.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::registry::ExecutionRegistry;

/// Background task running [`ExecutionRegistry::reconcile`] on a fixed interval.
pub struct ReconciliationLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconciliationLoop {
    pub fn spawn(registry: Arc<ExecutionRegistry>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Reconciliation loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.reconcile().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reconciliation loop stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop after the pass in progress, if any.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Reconciliation loop ended abnormally");
        }
    }
}
