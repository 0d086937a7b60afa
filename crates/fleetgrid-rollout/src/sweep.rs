//! Periodic rollout advancement.

use std::time::Duration;

use tracing::{error, info};

use crate::scheduler::{RolloutScheduler, SweepReport};

/// Background loop that runs [`RolloutScheduler::sweep`] on an interval.
pub struct RolloutSweeper {
    scheduler: RolloutScheduler,
    interval: Duration,
}

impl RolloutSweeper {
    pub fn new(scheduler: RolloutScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// One sweep on the blocking pool; store transactions are synchronous.
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        let scheduler = self.scheduler.clone();
        match tokio::task::spawn_blocking(move || scheduler.sweep()).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "rollout sweep task failed");
                None
            }
        }
    }

    /// Sweep until `shutdown` changes.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "rollout sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    info!("rollout sweeper shutting down");
                    break;
                }
            }
        }
    }
}
