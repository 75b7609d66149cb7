// crates/leaseflow/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub owner: String,
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Listing row; the payload is left out on purpose, it can be large.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListItem {
    pub id: Uuid,
    pub owner: String,
    pub subject: String,
    pub status: JobStatus,

    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobListItem {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            owner: job.owner,
            subject: job.subject,
            status: job.status,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            next_attempt_at: job.next_attempt_at,
            locked_by: job.locked_by,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
