//! Candidate evaluation pipeline.
//!
//! Wires the stage queues, admission controller, provider fallback and
//! failure monitoring into one process:
//!
//! - [`Orchestrator`] turns submissions into stage jobs and reports progress
//! - [`StageHandler`] runs each stage against the [`Collaborators`]
//! - [`Pipeline`] builds every component and owns the background tasks
//!
//! # Usage
//!
//! ```ignore
//! let config = PipelineConfig::from_env()?;
//! telemetry::init_tracing(&config.log)?;
//! let pipeline = Pipeline::start(config, collaborators).await?;
//! let batch = pipeline.orchestrator().submit_batch(ids, "jp1").await?;
//! pipeline.run_until_shutdown().await?;
//! ```

mod app;
mod collaborators;
mod config;
mod error;
pub mod events;
mod handlers;
mod metrics;
mod orchestrator;
pub mod recovery;
pub mod telemetry;

pub use app::Pipeline;
pub use collaborators::{
    CandidateContext, CandidateStore, Collaborators, CollaboratorFuture, ContactInfo,
    DocumentExtractor, ExtractedDocument, Scorer, StageProviders,
};
pub use config::{LogConfig, PipelineConfig};
pub use error::PipelineError;
pub use events::JobEventCounters;
pub use handlers::{StageContext, StageHandler};
pub use metrics::PipelineMetrics;
pub use orchestrator::{BatchCancellation, Orchestrator, QueueOutcome};
