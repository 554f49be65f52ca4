//! Background eviction scheduling

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SweepConfig;
use crate::storage::manager::{EvictionReport, StorageManager};

/// Runs sweeps on a fixed interval and whenever a retention scope crosses
/// the utilisation trigger, until its token is cancelled.
pub struct SweepScheduler {
    manager: Arc<StorageManager>,
    interval: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
}

impl SweepScheduler {
    pub fn new(manager: Arc<StorageManager>, config: &SweepConfig, cancel: CancellationToken) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            cancel,
        }
    }

    /// Override both periods
    pub fn with_periods(mut self, interval: Duration, check_interval: Duration) -> Self {
        self.interval = interval;
        self.check_interval = check_interval;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }

    /// Loop until cancelled. Returns the number of sweeps completed.
    pub async fn run(self) -> usize {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        interval.tick().await;

        let mut check = tokio::time::interval(self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        check.tick().await;

        info!(
            interval_secs = self.interval.as_secs(),
            check_interval_secs = self.check_interval.as_secs(),
            "Sweep scheduler started"
        );

        let mut completed = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(sweeps = completed, "Sweep scheduler stopped");
                    return completed;
                }
                _ = interval.tick() => {
                    if self.sweep_once("interval").await.is_some() {
                        completed += 1;
                    }
                }
                _ = check.tick() => {
                    match self.manager.needs_sweep().await {
                        Ok(true) => {
                            if self.sweep_once("utilisation").await.is_some() {
                                completed += 1;
                            }
                        }
                        Ok(false) => debug!("Utilisation below trigger"),
                        Err(e) => error!(error = %e, "Utilisation check failed"),
                    }
                }
            }
        }
    }

    async fn sweep_once(&self, trigger: &str) -> Option<EvictionReport> {
        match self.manager.sweep(Utc::now(), &self.cancel).await {
            Ok(report) => {
                info!(
                    trigger,
                    purged = report.purged_ids.len(),
                    candidates = report.candidates_considered,
                    aborted_batches = report.aborted_batches,
                    "Scheduled sweep complete"
                );
                Some(report)
            }
            Err(e) => {
                error!(trigger, error = %e, "Scheduled sweep failed");
                None
            }
        }
    }
}
