//! Errors surfaced by the pipeline.

use actors::QueueError;
use admission::AdmissionError;
use db::DbError;
use monitor::MonitorError;
use pipeline_core::{BatchId, InvalidStage, Stage};
use providers::ExecutorError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    InvalidStage(#[from] InvalidStage),

    #[error("maximum retry attempts reached for stage {stage} of candidate {candidate_id} (limit {max})")]
    MaxRetriesReached {
        candidate_id: String,
        stage: Stage,
        max: u32,
    },

    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Provider error: {0}")]
    Provider(#[from] ExecutorError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Configuration error: {0}")]
    Config(String),
}
