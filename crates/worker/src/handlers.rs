use async_trait::async_trait;
use leaseflow::jobs::{Job, JobError, JobHandler};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;

/// Gives up on a handler that outlives `timeout`, so the attempt is reported
/// as failed while the lease is still ours.
pub struct Timed {
    inner: Arc<dyn JobHandler>,
    timeout: Duration,
}

impl Timed {
    pub fn new(inner: Arc<dyn JobHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl JobHandler for Timed {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match timeout(self.timeout, self.inner.handle(job)).await {
            Ok(inner) => inner,
            Err(_) => Err(JobError::new(
                "TIMEOUT",
                format!("handler timeout after {}ms", self.timeout.as_millis()),
            )),
        }
    }
}

// Stand-in for the real embedding call: sleeps, then succeeds or fails as the
// payload asks.
#[derive(Deserialize)]
struct EmbedPayload {
    #[serde(default)]
    text: String,
    #[serde(default)]
    work_ms: u64,
    fail_with: Option<String>,
}

pub struct EmbedHandler;

fn parse_payload<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload.clone())
        .map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
}

#[async_trait]
impl JobHandler for EmbedHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: EmbedPayload = parse_payload(job)?;

        tokio::time::sleep(Duration::from_millis(payload.work_ms)).await;

        if let Some(message) = payload.fail_with {
            return Err(JobError::new("DEPENDENCY_DOWN", message));
        }

        tracing::debug!(
            job_id = %job.id,
            subject = %job.subject,
            chars = payload.text.chars().count(),
            "embedded subject"
        );
        Ok(())
    }
}

pub fn build_handler(job_timeout: Duration) -> Arc<dyn JobHandler> {
    Arc::new(Timed::new(Arc::new(EmbedHandler), job_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leaseflow::jobs::JobStatus;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn job_with(payload: Value) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            owner: "user-1".into(),
            subject: "recipe-1".into(),
            status: JobStatus::Running,
            payload,
            attempt_count: 1,
            max_attempts: 5,
            next_attempt_at: None,
            locked_at: Some(now),
            locked_by: Some("w".into()),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn embed_handler_honours_requested_failure() {
        let err = EmbedHandler
            .handle(&job_with(json!({"fail_with": "vector api down"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, "DEPENDENCY_DOWN");
        assert_eq!(err.message, "vector api down");
    }

    #[tokio::test]
    async fn malformed_payload_is_bad_payload() {
        let err = EmbedHandler
            .handle(&job_with(json!({"work_ms": "soon"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, "BAD_PAYLOAD");
    }

    #[tokio::test]
    async fn slow_job_times_out() {
        let handler = Timed::new(Arc::new(EmbedHandler), Duration::from_millis(20));
        let err = handler
            .handle(&job_with(json!({"work_ms": 1_000})))
            .await
            .unwrap_err();
        assert_eq!(err.code, "TIMEOUT");
    }
}
