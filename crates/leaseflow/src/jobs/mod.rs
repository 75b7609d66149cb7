pub mod backoff;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod queue;
pub mod reaper;
pub mod store;
pub mod worker;

pub use backoff::{next_delay, BackoffConfig};
pub use memory::MemoryStore;
pub use model::{
    Job, JobId, JobStatus, JobStatusView, ListFilter, NewJob, Owner, StatusCounts, Transition,
    DEFAULT_MAX_ATTEMPTS,
};
pub use postgres::PgJobStore;
pub use queue::JobQueue;
pub use reaper::{Reaper, SweepReport};
pub use store::JobStore;
pub use worker::{JobError, JobHandler, Worker};
