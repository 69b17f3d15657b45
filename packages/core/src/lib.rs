//! Core domain types for the candidate evaluation pipeline.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and Priority for work items
//! - Queue, QueueConfig and QueueStats for named stage queues
//! - Stage and StagePayload for the six-step pipeline
//! - Batch and progress types
//! - ErrorKind, the failure taxonomy
//! - Events for lifecycle monitoring
//! - A marker for panics a caller already handles

mod admission;
mod batch;
mod error_kind;
mod events;
mod job;
mod panic_scope;
mod queue;
mod stage;

pub use admission::{AdmissionGate, OpenGate};
pub use batch::{Batch, BatchId, BatchProgress, BatchStatus, StageProgress};
pub use error_kind::ErrorKind;
pub use events::JobEvent;
pub use job::{EnqueueOptions, Job, JobId, JobResult, JobState, JobStatus, Priority};
pub use panic_scope::{Contained, contain_panics, panic_is_contained};
pub use queue::{BackoffPolicy, Queue, QueueConfig, QueueState, QueueStats};
pub use stage::{CandidateRef, InvalidStage, Stage, StagePayload};
