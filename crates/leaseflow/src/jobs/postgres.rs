// crates/leaseflow/src/jobs/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::jobs::model::{
    Job, JobId, JobRow, JobStatus, ListFilter, NewJob, Owner, StatusCounts, Transition,
};
use crate::jobs::store::JobStore;

/// Postgres-backed `JobStore`. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    // ----------------------------
    // Producer side
    // ----------------------------

    async fn enqueue(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        job.validate()?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, owner, subject, status, payload, attempt_count, max_attempts,
                              created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', $4, 0, $5, $6, $6)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&job.owner)
        .bind(&job.subject)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    // ----------------------------
    // Claim
    // ----------------------------

    /// One statement: the candidate CTE takes a row lock with
    /// SKIP LOCKED, so concurrent claimers fall through to the next-oldest
    /// eligible row instead of queueing behind each other.
    async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE status = 'queued'
                AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
                AND attempt_count < max_attempts
              ORDER BY created_at ASC, id ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'running',
                locked_by = $1,
                locked_at = $2,
                started_at = COALESCE(j.started_at, $2),
                next_attempt_at = NULL,
                attempt_count = j.attempt_count + 1,
                updated_at = $2
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    async fn complete(
        &self,
        id: JobId,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done',
                locked_at = NULL,
                locked_by = NULL,
                error_message = NULL,
                finished_at = $3,
                updated_at = $3
            WHERE id = $1
              AND status = 'running'
              AND locked_by = $2
              AND ($4::timestamptz IS NULL OR locked_at = $4)
            "#,
        )
        .bind(id)
        .bind(&owner.worker_id)
        .bind(now)
        .bind(owner.locked_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 1 {
            Ok(Transition::Done)
        } else {
            Ok(Transition::NotOwner)
        }
    }

    /// Retry vs. terminal failure is decided from the row's own counters in
    /// the same statement that releases the lock.
    async fn fail(
        &self,
        id: JobId,
        owner: &Owner,
        error: &str,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        let updated = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempt_count < max_attempts THEN 'queued' ELSE 'failed' END,
                next_attempt_at = CASE WHEN attempt_count < max_attempts THEN $4 ELSE NULL END,
                finished_at = CASE WHEN attempt_count < max_attempts THEN NULL ELSE $5 END,
                locked_at = NULL,
                locked_by = NULL,
                error_message = $3,
                updated_at = $5
            WHERE id = $1
              AND status = 'running'
              AND locked_by = $2
              AND ($6::timestamptz IS NULL OR locked_at = $6)
            RETURNING status, next_attempt_at
            "#,
        )
        .bind(id)
        .bind(&owner.worker_id)
        .bind(error)
        .bind(retry_at)
        .bind(now)
        .bind(owner.locked_at)
        .fetch_optional(&self.pool)
        .await?;

        let Some((status, next_attempt_at)) = updated else {
            return Ok(Transition::NotOwner);
        };

        match (status.parse::<JobStatus>()?, next_attempt_at) {
            (JobStatus::Queued, Some(next_attempt_at)) => {
                Ok(Transition::Retrying { next_attempt_at })
            }
            (JobStatus::Failed, _) => Ok(Transition::Failed),
            (other, _) => Err(QueueError::Corrupt(format!(
                "job {id} left fail() in status {other}"
            ))),
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    async fn stale_leases(
        &self,
        locked_before: DateTime<Utc>,
        limit: i64,
    ) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'running'
              AND locked_at < $1
            ORDER BY locked_at ASC
            LIMIT $2
            "#,
        )
        .bind(locked_before)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn list(&self, filter: &ListFilter) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.clamped_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.parse::<JobStatus>()? {
                JobStatus::Queued => counts.queued = n,
                JobStatus::Running => counts.running = n,
                JobStatus::Done => counts.done = n,
                JobStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
