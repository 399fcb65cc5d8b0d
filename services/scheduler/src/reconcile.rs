//! Implicit task-status reconciliation.
//!
//! After (re-)registration the scheduler's picture of running tasks can be
//! stale: statuses sent while it was away are gone. Periodically asking
//! the resource manager to replay the current status of every task closes
//! the gap; the replies flow through the normal status path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::driver::Driver;

/// Reconciliation loop configuration.
pub struct ReconcilerConfig {
    /// Interval between implicit reconciliation requests.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodically requests implicit reconciliation from the resource
/// manager.
pub struct ImplicitReconciler {
    driver: Arc<dyn Driver>,
    config: ReconcilerConfig,
}

impl ImplicitReconciler {
    pub fn new(driver: Arc<dyn Driver>, config: ReconcilerConfig) -> Self {
        Self { driver, config }
    }

    /// Spawns the reconciliation loop; it runs until shutdown is
    /// signalled.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            reconciler.run(shutdown).await;
        });
    }

    /// Runs the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting implicit reconciliation loop"
        );
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile().await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender also means the process is winding
                    // down.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One implicit reconciliation request: an empty task set asks the
    /// resource manager to replay status for everything it knows about.
    async fn reconcile(&self) {
        debug!("Requesting implicit task reconciliation");
        if let Err(e) = self.driver.reconcile_tasks(&[]).await {
            warn!(error = %e, "Implicit reconciliation request failed, will retry");
        }
    }
}
