// tests/worker.rs
mod common;

use async_trait::async_trait;
use common::{memory_queue, recipe_job, secs};
use leaseflow::jobs::{Job, JobError, JobHandler, JobQueue, JobStatus, Transition, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Fails the first `failures` calls, then succeeds.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl JobHandler for Flaky {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(JobError::new("DEPENDENCY_DOWN", format!("call {n}")))
        } else {
            Ok(())
        }
    }
}

/// While running, loses its lease and re-claims the job under the same
/// worker id, then reports success for the old attempt.
struct LosesLease {
    queue: JobQueue,
}

#[async_trait]
impl JobHandler for LosesLease {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let locked_at = job.locked_at.expect("claimed job has a lease");
        self.queue
            .fail_at(job.id, "worker-a", "lease expired", locked_at + secs(1))
            .await
            .unwrap();
        self.queue
            .claim_at("worker-a", locked_at + secs(60))
            .await
            .unwrap()
            .expect("job is claimable again after backoff");
        Ok(())
    }
}

#[tokio::test]
async fn run_once_with_nothing_eligible_returns_none() {
    let worker = Worker::new(memory_queue(), Flaky::new(0), "worker-a");
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn successful_handler_completes_job() {
    let queue = memory_queue();
    let id = queue.enqueue(recipe_job("a")).await.unwrap();
    let worker = Worker::new(queue.clone(), Flaky::new(0), "worker-a");

    let (ran, transition) = worker.run_once().await.unwrap().unwrap();
    assert_eq!(ran, id);
    assert_eq!(transition, Transition::Done);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn failing_handler_schedules_retry_with_error_recorded() {
    let queue = memory_queue();
    let id = queue.enqueue(recipe_job("a")).await.unwrap();
    let worker = Worker::new(queue.clone(), Flaky::new(1), "worker-a");

    let (_, transition) = worker.run_once().await.unwrap().unwrap();
    assert!(matches!(transition, Transition::Retrying { .. }));

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.error_message.as_deref(), Some("DEPENDENCY_DOWN: call 0"));

    // still backing off
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn run_drains_queue_until_shutdown() {
    let queue = memory_queue();
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(queue.enqueue(recipe_job(&format!("r{i}"))).await.unwrap());
    }

    let handler = Flaky::new(0);
    let worker = Worker::new(queue.clone(), handler.clone(), "worker-a")
        .poll_interval(Duration::from_millis(5));
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.counts().await.unwrap().done < 5 {
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain queue");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    for id in ids {
        assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Done);
    }
}

#[tokio::test]
async fn report_for_an_earlier_lease_does_not_touch_the_new_one() {
    let queue = memory_queue();
    let id = queue.enqueue(recipe_job("a")).await.unwrap();
    let handler = Arc::new(LosesLease {
        queue: queue.clone(),
    });
    let worker = Worker::new(queue.clone(), handler, "worker-a");

    let (ran, transition) = worker.run_once().await.unwrap().unwrap();
    assert_eq!(ran, id);
    assert_eq!(transition, Transition::NotOwner);

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.locked_by.as_deref(), Some("worker-a"));
    assert_eq!(job.attempt_count, 2);
}

#[test]
fn job_error_displays_code_and_message() {
    let err = JobError::new("TIMEOUT", "took too long");
    assert_eq!(err.to_string(), "TIMEOUT: took too long");
}
