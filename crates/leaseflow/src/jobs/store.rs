use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::jobs::model::{Job, JobId, ListFilter, NewJob, Owner, StatusCounts, Transition};

/// Durable job storage.
///
/// Every mutation of a job goes through `enqueue`, `claim`, `complete` or
/// `fail`; each one is atomic with respect to concurrent callers. There is no
/// way to set a status directly.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId>;

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Take the oldest eligible job for `worker_id`, or `None` if nothing is
    /// eligible. Rows another caller is in the middle of claiming are skipped,
    /// never waited on.
    async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>>;

    /// RUNNING -> DONE, provided `owner` still holds the job.
    async fn complete(&self, id: JobId, owner: &Owner, now: DateTime<Utc>)
        -> QueueResult<Transition>;

    /// RUNNING -> QUEUED (at `retry_at`) while attempts remain, otherwise
    /// RUNNING -> FAILED. Provided `owner` still holds the job.
    async fn fail(
        &self,
        id: JobId,
        owner: &Owner,
        error: &str,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition>;

    /// RUNNING jobs whose lease was taken before `locked_before`, oldest first.
    async fn stale_leases(&self, locked_before: DateTime<Utc>, limit: i64)
        -> QueueResult<Vec<Job>>;

    /// Newest first.
    async fn list(&self, filter: &ListFilter) -> QueueResult<Vec<Job>>;

    async fn counts(&self) -> QueueResult<StatusCounts>;
}
