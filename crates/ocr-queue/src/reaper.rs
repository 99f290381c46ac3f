//! Background maintenance: stale attempt reaping and record expiry

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{JobStore, StoreError};
use crate::worker::{record_failure, AttemptOutcome};

#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// Pause between sweeps
    pub interval: Duration,
    /// Extra time past a job's timeout before its attempt is declared dead.
    /// Leaves the owning worker room to settle its own deadline first.
    pub grace: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            grace: Duration::from_secs(5),
        }
    }
}

/// Counts from a single sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub reaped: usize,
    pub expired: usize,
}

pub struct Reaper<S: JobStore + ?Sized> {
    store: Arc<S>,
    config: ReaperConfig,
}

impl<S: JobStore + ?Sized> Reaper<S> {
    pub fn new(store: Arc<S>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Fail every started attempt that outlived its deadline
    pub async fn reap_overdue(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut reaped = 0;

        for job in self.store.started().await? {
            if !job.is_overdue(now, self.config.grace) {
                continue;
            }

            let message = format!("Attempt {} exceeded timeout of {:?}", job.attempt, job.policy.timeout);
            match record_failure(self.store.as_ref(), &job, message).await? {
                AttemptOutcome::Discarded => {
                    debug!(job_id = %job.id, "Overdue attempt settled concurrently");
                }
                outcome => {
                    warn!(job_id = %job.id, attempt = job.attempt, ?outcome, "Reaped overdue attempt");
                    reaped += 1;
                }
            }
        }

        Ok(reaped)
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let reaped = self.reap_overdue().await?;
        let expired = self.store.expire(Utc::now()).await?;
        Ok(SweepReport { reaped, expired })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.config.interval.as_millis() as u64, "Reaper started");

        while !*shutdown.borrow() {
            match self.sweep().await {
                Ok(report) if report != SweepReport::default() => {
                    info!(reaped = report.reaped, expired = report.expired, "Reaper sweep");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Reaper sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reaper stopped");
    }
}
