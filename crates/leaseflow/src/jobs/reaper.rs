use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{QueueError, QueueResult};
use crate::jobs::model::{Owner, Transition};
use crate::jobs::queue::JobQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: u64,
    pub failed: u64,
    /// Leases that were released or re-taken between the scan and the update.
    pub skipped: u64,
}

impl SweepReport {
    pub fn reclaimed(&self) -> u64 {
        self.requeued + self.failed
    }
}

/// Pushes jobs whose worker went silent back through the failure path.
#[derive(Clone)]
pub struct Reaper {
    queue: JobQueue,
    lease_timeout: Duration,
    interval: Duration,
    batch_size: i64,
}

impl Reaper {
    pub fn new(queue: JobQueue, lease_timeout: Duration, interval: Duration) -> Self {
        Self {
            queue,
            lease_timeout,
            interval,
            batch_size: 500,
        }
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn sweep(&self) -> QueueResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> QueueResult<SweepReport> {
        let timeout = chrono::Duration::from_std(self.lease_timeout)
            .map_err(|e| QueueError::InvalidArgument(format!("lease timeout: {e}")))?;
        let stale = self
            .queue
            .store()
            .stale_leases(now - timeout, self.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for job in stale {
            let (Some(worker_id), Some(locked_at)) = (job.locked_by.clone(), job.locked_at) else {
                report.skipped += 1;
                continue;
            };

            let error = format!("lease expired (held by {worker_id})");
            let owner = Owner::lease(worker_id, locked_at);
            match self.queue.fail_as(job.id, &owner, &error, now).await? {
                Transition::Retrying { .. } => report.requeued += 1,
                Transition::Failed => report.failed += 1,
                Transition::Done | Transition::NotOwner => report.skipped += 1,
            }
        }

        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match self.sweep().await {
                Ok(report) if report.reclaimed() > 0 => tracing::info!(
                    requeued = report.requeued,
                    failed = report.failed,
                    skipped = report.skipped,
                    "reaped expired leases"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "reaper sweep failed"),
            }
        }

        tracing::info!("reaper stopped");
    }
}
