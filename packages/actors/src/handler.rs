//! Job handler trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pipeline_core::{Job, JobResult};

/// Result type for job handlers. The error string becomes the job's
/// failure reason.
pub type HandlerResult = Result<JobResult, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how the jobs of one queue are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job and return the result.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }

    /// Wrap into the shared form `consume` takes.
    pub fn shared(handler: F) -> Arc<dyn JobHandler> {
        Arc::new(Self::new(handler))
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async blocks.
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::shared(|$job: &pipeline_core::Job| {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}
