use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::error::QueueResult;
use crate::jobs::model::{Job, JobId, Owner, Transition};
use crate::jobs::queue::JobQueue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Executes a claimed job's payload. The queue never looks inside it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// One poll loop: claim, execute, report.
#[derive(Clone)]
pub struct Worker {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    worker_id: String,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, worker_id: impl Into<String>) -> Self {
        Self {
            queue,
            handler,
            worker_id: worker_id.into(),
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs at most one job. `None` means nothing was eligible.
    pub async fn run_once(&self) -> QueueResult<Option<(JobId, Transition)>> {
        let Some(job) = self.queue.claim(&self.worker_id).await? else {
            return Ok(None);
        };

        // report under this exact lease; a stale report from an earlier
        // lease held by the same worker id must not apply
        let owner = match job.locked_at {
            Some(locked_at) => Owner::lease(self.worker_id.clone(), locked_at),
            None => Owner::worker(self.worker_id.clone()),
        };

        let start = Instant::now();
        let result = self.handler.handle(&job).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let transition = match result {
            Ok(()) => self.queue.complete_as(job.id, &owner, Utc::now()).await?,
            Err(err) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempt_count = job.attempt_count,
                    code = err.code,
                    latency_ms,
                    "job attempt failed"
                );
                self.queue
                    .fail_as(job.id, &owner, &err.to_string(), Utc::now())
                    .await?
            }
        };

        tracing::debug!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            latency_ms,
            ?transition,
            "job attempt finished"
        );
        Ok(Some((job.id, transition)))
    }

    /// Loop until `shutdown` flips to true. Store errors end the loop; the
    /// caller decides whether to restart it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        tracing::info!(worker_id = %self.worker_id, "worker started");

        while !*shutdown.borrow() {
            if self.run_once().await?.is_some() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }
}
