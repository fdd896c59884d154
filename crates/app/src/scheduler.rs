use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use domain_watch_core::ReconcileSummary;

use crate::reconcile::{ReconcileError, Reconciler};

/// Background worker that runs a reconciliation pass on a fixed cadence,
/// for deployments without an external cron.
#[derive(Clone)]
pub struct ReconcileWorker {
    reconciler: Reconciler,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "scheduler", error = %err, "scheduled reconciliation failed");
            }
        }
    }

    /// Executes one scheduled pass.
    pub async fn run_once(&self) -> Result<ReconcileSummary, ReconcileError> {
        let summary = self.reconciler.run().await?;
        info!(
            stage = "scheduler",
            checked = summary.checked,
            available = summary.available,
            duration_ms = summary.duration_ms,
            "scheduled reconciliation completed"
        );
        Ok(summary)
    }
}
