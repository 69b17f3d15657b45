//! Turns queue lifecycle events into log records and counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use monitor::{FailurePatternRecorder, MetricSnapshot, MetricSource, MetricsFuture};
use pipeline_core::{ErrorKind, JobEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const JOBS_ENQUEUED: &str = "jobs.enqueued";
pub const JOBS_COMPLETED: &str = "jobs.completed";
pub const JOBS_FAILED: &str = "jobs.failed";
pub const JOBS_RETRIED: &str = "jobs.retried";
pub const JOBS_STALLED: &str = "jobs.stalled";

/// Service name stalls are recorded under.
pub const QUEUE_SERVICE: &str = "queue";

/// Totals of job lifecycle events since start-up.
#[derive(Debug, Default)]
pub struct JobEventCounters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    stalled: AtomicU64,
}

impl JobEventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that failed with no attempts left.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn stalled(&self) -> u64 {
        self.stalled.load(Ordering::Relaxed)
    }
}

impl MetricSource for JobEventCounters {
    fn collect(&self) -> MetricsFuture<'_> {
        let snapshot = MetricSnapshot::from([
            (JOBS_ENQUEUED.to_string(), self.enqueued.load(Ordering::Relaxed) as f64),
            (JOBS_COMPLETED.to_string(), self.completed() as f64),
            (JOBS_FAILED.to_string(), self.failed() as f64),
            (JOBS_RETRIED.to_string(), self.retried.load(Ordering::Relaxed) as f64),
            (JOBS_STALLED.to_string(), self.stalled() as f64),
        ]);
        Box::pin(async move { snapshot })
    }
}

async fn handle_event(event: JobEvent, counters: &JobEventCounters, recorder: &FailurePatternRecorder) {
    match &event {
        JobEvent::JobEnqueued { .. } => {
            counters.enqueued.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{}", event.description());
        }
        JobEvent::JobCompleted {
            job_id,
            queue,
            duration_ms,
            ..
        } => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(job_id = %job_id, queue = %queue, duration_ms, "Job completed");
        }
        JobEvent::JobFailed {
            job_id,
            queue,
            error,
            attempts_made,
            will_retry,
            ..
        } => {
            if *will_retry {
                tracing::warn!(job_id = %job_id, queue = %queue, attempts_made, "Job attempt failed: {}", error);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(job_id = %job_id, queue = %queue, attempts_made, "Job failed: {}", error);
            }
        }
        JobEvent::JobRetrying { .. } => {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{}", event.description());
        }
        JobEvent::JobStalled {
            job_id,
            queue,
            worker_id,
            ..
        } => {
            counters.stalled.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(job_id = %job_id, queue = %queue, worker_id = %worker_id, "Job stalled");
            recorder
                .record_failure(
                    QUEUE_SERVICE,
                    queue,
                    ErrorKind::Timeout,
                    &format!("worker {} stopped renewing its lease", worker_id),
                )
                .await;
        }
        JobEvent::QueueStateChanged { .. } | JobEvent::QueueCleaned { .. } => {
            tracing::info!("{}", event.description());
        }
        _ => tracing::debug!("{}", event.description()),
    }
}

/// Consume `events` until `token` is cancelled or the channel closes.
pub fn spawn_event_logger(
    mut events: broadcast::Receiver<JobEvent>,
    counters: Arc<JobEventCounters>,
    recorder: FailurePatternRecorder,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => handle_event(event, &counters, &recorder).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event logger fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Event logger stopped");
    })
}
