use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::jobs::model::{
    Job, JobId, JobStatus, ListFilter, NewJob, Owner, StatusCounts, Transition,
};
use crate::jobs::store::JobStore;

struct Slot {
    seq: u64,
    created_at: DateTime<Utc>,
    // set while one claimer is deciding this row; other claimers skip it
    claiming: AtomicBool,
    job: Mutex<Job>,
}

impl Slot {
    fn try_mark(&self) -> Option<ClaimMark<'_>> {
        self.claiming
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ClaimMark(&self.claiming))
    }
}

struct ClaimMark<'a>(&'a AtomicBool);

impl Drop for ClaimMark<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Table {
    // insertion order; never shrinks
    slots: Vec<Arc<Slot>>,
    by_id: HashMap<JobId, Arc<Slot>>,
}

/// In-process `JobStore`.
///
/// Each job sits behind its own mutex, plus a claim marker that only
/// claimers touch. `claim` skips a row only when another claimer holds its
/// marker; readers holding the data lock never cause a skip. Eligibility is
/// re-checked under the data lock before the row becomes RUNNING.
#[derive(Clone, Default)]
pub struct MemoryStore {
    table: Arc<RwLock<Table>>,
}

fn poisoned<T>(_: T) -> QueueError {
    QueueError::Unavailable("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> QueueResult<Vec<Arc<Slot>>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table.slots.clone())
    }

    fn slot(&self, id: JobId) -> QueueResult<Option<Arc<Slot>>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table.by_id.get(&id).cloned())
    }

    fn transition(
        &self,
        id: JobId,
        owner: &Owner,
        apply: impl FnOnce(&mut Job) -> Transition,
    ) -> QueueResult<Transition> {
        let Some(slot) = self.slot(id)? else {
            return Ok(Transition::NotOwner);
        };
        let mut job = slot.job.lock().map_err(poisoned)?;
        if !job.is_held_by(owner) {
            return Ok(Transition::NotOwner);
        }
        Ok(apply(&mut job))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, new: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        new.validate()?;

        let id = Uuid::new_v4();
        let job = Job {
            id,
            owner: new.owner,
            subject: new.subject,
            status: JobStatus::Queued,
            payload: new.payload,
            attempt_count: 0,
            max_attempts: new.max_attempts,
            next_attempt_at: None,
            locked_at: None,
            locked_by: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };

        let mut table = self.table.write().map_err(poisoned)?;
        let slot = Arc::new(Slot {
            seq: table.slots.len() as u64,
            created_at: now,
            claiming: AtomicBool::new(false),
            job: Mutex::new(job),
        });
        table.slots.push(slot.clone());
        table.by_id.insert(id, slot);

        Ok(id)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        match self.slot(id)? {
            Some(slot) => Ok(Some(slot.job.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        // 1) candidate scan; never waits on a row lock. A row whose lock is
        // busy stays a candidate and is settled in step 2.
        let mut candidates = Vec::new();
        for slot in self.snapshot()? {
            if slot.claiming.load(Ordering::Relaxed) {
                continue;
            }
            let eligible = match slot.job.try_lock() {
                Ok(job) => job.is_eligible(now),
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(e)) => return Err(poisoned(e)),
            };
            if eligible {
                candidates.push(slot);
            }
        }
        candidates.sort_by_key(|slot| (slot.created_at, slot.seq));

        // 2) take the claim marker of the oldest candidate no other claimer
        // is deciding, then flip it under the data lock
        for slot in candidates {
            let Some(_mark) = slot.try_mark() else {
                continue;
            };
            let mut job = slot.job.lock().map_err(poisoned)?;
            if !job.is_eligible(now) {
                continue;
            }

            job.status = JobStatus::Running;
            job.locked_by = Some(worker_id.to_string());
            job.locked_at = Some(now);
            job.started_at = job.started_at.or(Some(now));
            job.next_attempt_at = None;
            job.attempt_count += 1;
            job.updated_at = now;

            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    async fn complete(
        &self,
        id: JobId,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        self.transition(id, owner, |job| {
            job.status = JobStatus::Done;
            job.locked_at = None;
            job.locked_by = None;
            job.error_message = None;
            job.finished_at = Some(now);
            job.updated_at = now;
            Transition::Done
        })
    }

    async fn fail(
        &self,
        id: JobId,
        owner: &Owner,
        error: &str,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Transition> {
        self.transition(id, owner, |job| {
            job.locked_at = None;
            job.locked_by = None;
            job.error_message = Some(error.to_string());
            job.updated_at = now;

            if job.attempt_count < job.max_attempts {
                job.status = JobStatus::Queued;
                job.next_attempt_at = Some(retry_at);
                Transition::Retrying {
                    next_attempt_at: retry_at,
                }
            } else {
                job.status = JobStatus::Failed;
                job.next_attempt_at = None;
                job.finished_at = Some(now);
                Transition::Failed
            }
        })
    }

    async fn stale_leases(
        &self,
        locked_before: DateTime<Utc>,
        limit: i64,
    ) -> QueueResult<Vec<Job>> {
        let mut stale = Vec::new();
        for slot in self.snapshot()? {
            let job = slot.job.lock().map_err(poisoned)?;
            if job.status == JobStatus::Running
                && job.locked_at.is_some_and(|at| at < locked_before)
            {
                stale.push(job.clone());
            }
        }
        stale.sort_by_key(|job| job.locked_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn list(&self, filter: &ListFilter) -> QueueResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for slot in self.snapshot()?.iter().rev() {
            let job = slot.job.lock().map_err(poisoned)?;
            if filter.status.map_or(true, |s| job.status == s) {
                jobs.push(job.clone());
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.clamped_limit() as usize);
        Ok(jobs)
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for slot in self.snapshot()? {
            match slot.job.lock().map_err(poisoned)?.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
