//! Admission control for pipeline workers.
//!
//! The [`AdmissionController`] samples memory on a fixed interval, keeps a
//! bounded history, and tightens or restores [`ProcessingLimits`] as usage
//! moves between tiers. Queue workers consult it through the
//! `AdmissionGate` trait before taking a job.
//!
//! ```ignore
//! let controller = AdmissionController::system(AdmissionConfig::default());
//! let sampling = controller.start(token.clone());
//! queue.consume("resume-processing", 4, handler, Arc::new(controller.clone())).await?;
//! ```

mod cleanup;
mod config;
mod controller;
mod error;
pub mod lifecycle;
mod limits;
mod sampler;

pub use cleanup::{CleanupFuture, CleanupOutcome};
pub use config::AdmissionConfig;
pub use controller::{AdmissionController, MemoryEvent, MemoryReport};
pub use error::AdmissionError;
pub use limits::ProcessingLimits;
pub use sampler::{
    ManualSampler, MemorySampler, MemoryStats, MemoryTier, MemoryTrend, SystemMemorySampler,
};
