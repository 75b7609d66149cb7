pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{QueueError, QueueResult};
