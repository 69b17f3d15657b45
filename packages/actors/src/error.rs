//! Errors surfaced by the job queue.

use db::DbError;
use pipeline_core::JobId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Queue {0} is not accepting jobs")]
    QueueStopped(String),

    #[error("Queue {0} has no consumer attached")]
    NoConsumer(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Failed to spawn actor: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timed out waiting for queue actor")]
    Timeout,
}
