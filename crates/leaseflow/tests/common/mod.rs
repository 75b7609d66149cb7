#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use leaseflow::jobs::{BackoffConfig, JobQueue, JobStore, MemoryStore, NewJob};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;

/// Fixed starting instant so tests can move time forward explicitly.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

pub fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

pub fn no_jitter() -> BackoffConfig {
    BackoffConfig {
        base_seconds: 2,
        max_seconds: 60,
        jitter_pct: 0.0,
    }
}

pub fn memory_queue() -> JobQueue {
    queue_over(Arc::new(MemoryStore::new()))
}

pub fn queue_over(store: Arc<dyn JobStore>) -> JobQueue {
    JobQueue::new(store, no_jitter()).expect("valid backoff config")
}

pub fn recipe_job(subject: &str) -> NewJob {
    NewJob::new("user-1", subject, json!({ "text": format!("recipe {subject}") }))
}

/// Postgres pool for integration tests, or `None` when TEST_DATABASE_URL is
/// not set.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
