//! Repository implementations for database operations.

mod batch_repo;
mod job_repo;
mod queue_repo;
mod stage_retry_repo;

pub use batch_repo::BatchRepository;
pub use job_repo::{JobHistoryRecord, JobRepository};
pub use queue_repo::QueueRepository;
pub use stage_retry_repo::{StageRetry, StageRetryRepository};
