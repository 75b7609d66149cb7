use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::QueueError;

pub type JobId = Uuid;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::InvalidArgument(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub subject: String,
    pub status: JobStatus,
    pub payload: Value,

    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether `claim` may pick this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued
            && self.attempt_count < self.max_attempts
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn is_held_by(&self, owner: &Owner) -> bool {
        self.status == JobStatus::Running
            && self.locked_by.as_deref() == Some(owner.worker_id.as_str())
            && owner.locked_at.map_or(true, |at| self.locked_at == Some(at))
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            error_message: self.error_message.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Raw `jobs` row as stored in Postgres; status is kept as text there.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub owner: String,
    pub subject: String,
    pub status: String,
    pub payload: Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|_| QueueError::Corrupt(format!("job {} has status {}", row.id, row.status)))?;

        Ok(Job {
            id: row.id,
            owner: row.owner,
            subject: row.subject,
            status,
            payload: row.payload,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            next_attempt_at: row.next_attempt_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub owner: String,
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

fn default_max_attempts() -> i32 {
    DEFAULT_MAX_ATTEMPTS
}

impl NewJob {
    pub fn new(owner: impl Into<String>, subject: impl Into<String>, payload: Value) -> Self {
        Self {
            owner: owner.into(),
            subject: subject.into(),
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_attempts < 1 {
            return Err(QueueError::InvalidArgument(format!(
                "max_attempts must be >= 1, got {}",
                self.max_attempts
            )));
        }
        Ok(())
    }
}

/// Read-only polling projection of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Who must currently hold a job for a completion or failure to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub worker_id: String,
    /// When set, the lease must also have been taken at exactly this instant.
    pub locked_at: Option<DateTime<Utc>>,
}

impl Owner {
    pub fn worker(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            locked_at: None,
        }
    }

    pub fn lease(worker_id: impl Into<String>, locked_at: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            locked_at: Some(locked_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Done,
    Retrying { next_attempt_at: DateTime<Utc> },
    Failed,
    /// The caller no longer holds the job; nothing was changed.
    NotOwner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub limit: i64,
}

impl ListFilter {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 500)
    }
}
