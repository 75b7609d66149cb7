use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

use crate::error::{QueueError, QueueResult};
use crate::jobs::backoff::{next_delay, BackoffConfig};
use crate::jobs::model::{
    Job, JobId, JobStatusView, ListFilter, NewJob, Owner, StatusCounts, Transition,
};
use crate::jobs::store::JobStore;

/// Producer and worker entry points over a `JobStore`.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    backoff: BackoffConfig,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, backoff: BackoffConfig) -> QueueResult<Self> {
        backoff.validate()?;
        Ok(Self { store, backoff })
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    // ----------------------------
    // Producer interface
    // ----------------------------

    pub async fn enqueue(&self, job: NewJob) -> QueueResult<JobId> {
        self.enqueue_at(job, Utc::now()).await
    }

    pub async fn enqueue_at(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        let owner = job.owner.clone();
        let subject = job.subject.clone();
        let id = self.store.enqueue(job, now).await?;
        tracing::debug!(job_id = %id, %owner, %subject, "enqueued job");
        Ok(id)
    }

    pub async fn get(&self, id: JobId) -> QueueResult<Job> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    pub async fn get_status(&self, id: JobId) -> QueueResult<JobStatusView> {
        Ok(self.get(id).await?.status_view())
    }

    pub async fn list(&self, filter: &ListFilter) -> QueueResult<Vec<Job>> {
        self.store.list(filter).await
    }

    pub async fn counts(&self) -> QueueResult<StatusCounts> {
        self.store.counts().await
    }

    // ----------------------------
    // Worker interface
    // ----------------------------

    pub async fn claim(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        self.claim_at(worker_id, Utc::now()).await
    }

    pub async fn claim_at(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let job = self.store.claim(worker_id, now).await?;
        if let Some(job) = &job {
            tracing::debug!(
                %worker_id,
                job_id = %job.id,
                attempt_count = job.attempt_count,
                max_attempts = job.max_attempts,
                "claimed job"
            );
        }
        Ok(job)
    }

    pub async fn complete(&self, id: JobId, worker_id: &str) -> QueueResult<Transition> {
        self.complete_at(id, worker_id, Utc::now()).await
    }

    pub async fn complete_at(
        &self,
        id: JobId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        self.complete_as(id, &Owner::worker(worker_id), now).await
    }

    pub(crate) async fn complete_as(
        &self,
        id: JobId,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        let transition = self.store.complete(id, owner, now).await?;
        self.log_transition(id, &owner.worker_id, transition);
        Ok(transition)
    }

    pub async fn fail(&self, id: JobId, worker_id: &str, error: &str) -> QueueResult<Transition> {
        self.fail_at(id, worker_id, error, Utc::now()).await
    }

    pub async fn fail_at(
        &self,
        id: JobId,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        self.fail_as(id, &Owner::worker(worker_id), error, now).await
    }

    /// Shared failure path for workers and the reaper.
    pub(crate) async fn fail_as(
        &self,
        id: JobId,
        owner: &Owner,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        // attempt_count cannot move while `owner` holds the job; the store
        // re-checks ownership atomically, so a stale read here only risks a
        // NotOwner.
        let Some(job) = self.store.get(id).await? else {
            self.log_transition(id, &owner.worker_id, Transition::NotOwner);
            return Ok(Transition::NotOwner);
        };
        if !job.is_held_by(owner) {
            self.log_transition(id, &owner.worker_id, Transition::NotOwner);
            return Ok(Transition::NotOwner);
        }

        let mut rng = StdRng::from_entropy();
        let retry_at = now + next_delay(job.attempt_count, &self.backoff, &mut rng);

        let transition = self.store.fail(id, owner, error, retry_at, now).await?;
        self.log_transition(id, &owner.worker_id, transition);
        Ok(transition)
    }

    fn log_transition(&self, id: JobId, worker_id: &str, transition: Transition) {
        match transition {
            Transition::Done => tracing::debug!(job_id = %id, %worker_id, "job done"),
            Transition::Retrying { next_attempt_at } => tracing::info!(
                job_id = %id,
                %worker_id,
                %next_attempt_at,
                "job failed, retry scheduled"
            ),
            Transition::Failed => {
                tracing::warn!(job_id = %id, %worker_id, "job failed permanently")
            }
            Transition::NotOwner => tracing::warn!(
                job_id = %id,
                %worker_id,
                "ignoring transition from worker that no longer holds the job"
            ),
        }
    }
}
