use uuid::Uuid;

/// Errors surfaced by the queue to producers, workers and the reaper.
///
/// Ownership conflicts are deliberately absent: a worker that lost its lease
/// gets `Transition::NotOwner`, not an error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
