use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::{JobQueue, JobStatus, JobStatusView, ListFilter, NewJob, StatusCounts};

pub mod models;

use models::{EnqueueRequest, EnqueueResponse, ErrorBody, JobListItem, ListJobsQuery};

#[derive(Clone)]
pub struct ApiState {
    pub queue: JobQueue,
    pub default_max_attempts: i32,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/:id", get(get_status))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

/// Maps queue errors onto HTTP responses.
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            QueueError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::Store(_) | QueueError::Corrupt(_) => {
                tracing::error!(error = %self.0, "admin api request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    Json(body): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    if body.owner.trim().is_empty() || body.subject.trim().is_empty() {
        return Err(QueueError::InvalidArgument("owner and subject are required".into()).into());
    }

    let job = NewJob::new(body.owner, body.subject, body.payload)
        .max_attempts(body.max_attempts.unwrap_or(state.default_max_attempts));
    let job_id = state.queue.enqueue(job).await?;

    Ok((StatusCode::CREATED, Json(EnqueueResponse { job_id })))
}

pub async fn get_status(
    Path(id): Path<Uuid>,
    State(state): State<ApiState>,
) -> Result<Json<JobStatusView>, ApiError> {
    Ok(Json(state.queue.get_status(id).await?))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobListItem>>, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let filter = ListFilter {
        status,
        limit: q.limit.unwrap_or(100),
    };

    let jobs = state.queue.list(&filter).await?;
    Ok(Json(jobs.into_iter().map(JobListItem::from).collect()))
}

pub async fn metrics(State(state): State<ApiState>) -> Result<Json<StatusCounts>, ApiError> {
    Ok(Json(state.queue.counts().await?))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
