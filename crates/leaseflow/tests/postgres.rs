// tests/postgres.rs
//
// Runs against TEST_DATABASE_URL; each test is a no-op when it is unset.
mod common;

use common::{queue_over, recipe_job, secs, setup_db};
use leaseflow::jobs::{JobQueue, JobStatus, PgJobStore, Reaper, Transition};
use serial_test::serial;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn pg_queue(pool: &sqlx::PgPool) -> JobQueue {
    queue_over(Arc::new(PgJobStore::new(pool.clone())))
}

#[tokio::test]
#[serial]
async fn pg_two_workers_never_claim_same_job() {
    let Some(pool) = setup_db().await else { return };
    let queue = pg_queue(&pool);
    queue.enqueue(recipe_job("only")).await.unwrap();

    let (a, b) = tokio::join!(queue.claim("worker-a"), queue.claim("worker-b"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_some() ^ b.is_some());

    let (status, locked_by): (String, Option<String>) =
        sqlx::query_as("SELECT status, locked_by FROM jobs LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "running");
    assert!(matches!(locked_by.as_deref(), Some("worker-a") | Some("worker-b")));
}

#[tokio::test]
#[serial]
async fn pg_many_claimers_get_distinct_jobs_in_fifo_order() {
    let Some(pool) = setup_db().await else { return };
    let queue = pg_queue(&pool);

    let base = chrono::Utc::now() - secs(60);
    let mut enqueued = Vec::new();
    for i in 0..30 {
        enqueued.push(
            queue
                .enqueue_at(recipe_job(&format!("r{i}")), base + secs(i))
                .await
                .unwrap(),
        );
    }

    // single claimer sees strict creation order
    let first = queue.claim("solo").await.unwrap().unwrap();
    assert_eq!(first.id, enqueued[0]);

    let mut handles = Vec::new();
    for w in 0..6 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("worker-{w}");
            let mut mine = Vec::new();
            while let Some(job) = queue.claim(&worker_id).await.unwrap() {
                mine.push(job.id);
            }
            mine
        }));
    }

    let mut claimed = HashSet::from([first.id]);
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(claimed.insert(id), "job {id} was claimed twice");
        }
    }
    assert_eq!(claimed, enqueued.into_iter().collect::<HashSet<_>>());
}

#[tokio::test]
#[serial]
async fn pg_retry_then_terminal_failure() {
    let Some(pool) = setup_db().await else { return };
    let queue = pg_queue(&pool);
    let id = queue.enqueue(recipe_job("a").max_attempts(2)).await.unwrap();

    queue.claim("worker-a").await.unwrap().unwrap();
    let t = queue.fail(id, "worker-a", "TIMEOUT: slow").await.unwrap();
    let Transition::Retrying { next_attempt_at } = t else {
        panic!("expected retry, got {t:?}");
    };
    assert!(queue.claim("worker-a").await.unwrap().is_none());

    let job = queue
        .claim_at("worker-a", next_attempt_at + secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.attempt_count, 2);

    let t = queue.fail(id, "worker-a", "TIMEOUT: still slow").await.unwrap();
    assert_eq!(t, Transition::Failed);

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
    assert_eq!(job.next_attempt_at, None);
    assert_eq!(job.error_message.as_deref(), Some("TIMEOUT: still slow"));
}

#[tokio::test]
#[serial]
async fn pg_complete_requires_ownership() {
    let Some(pool) = setup_db().await else { return };
    let queue = pg_queue(&pool);
    let id = queue.enqueue(recipe_job("a")).await.unwrap();
    queue.claim("worker-a").await.unwrap().unwrap();

    assert_eq!(queue.complete(id, "worker-b").await.unwrap(), Transition::NotOwner);
    assert_eq!(queue.complete(id, "worker-a").await.unwrap(), Transition::Done);
    assert_eq!(queue.complete(id, "worker-a").await.unwrap(), Transition::NotOwner);

    let view = queue.get_status(id).await.unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert_eq!(view.error_message, None);
    assert!(view.finished_at.is_some());
}

#[tokio::test]
#[serial]
async fn pg_reaper_requeues_expired_lease() {
    let Some(pool) = setup_db().await else { return };
    let queue = pg_queue(&pool);
    let id = queue.enqueue(recipe_job("a")).await.unwrap();
    let job = queue.claim("worker-a").await.unwrap().unwrap();

    let reaper = Reaper::new(queue.clone(), Duration::from_secs(30), Duration::from_secs(1));
    let report = reaper
        .sweep_at(job.locked_at.unwrap() + secs(31))
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.locked_by, None);
    assert!(job.next_attempt_at.is_some());

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.running, 0);
}
