//! Lifecycle events emitted by the job queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, QueueState};

/// Events emitted by the job queue system for logging and monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Queue events
    /// A queue was created or recovered from the store.
    QueueCreated {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A queue's state changed (running, paused, etc.).
    QueueStateChanged {
        queue: String,
        old_state: QueueState,
        new_state: QueueState,
        timestamp: DateTime<Utc>,
    },
    /// Terminal jobs were archived.
    QueueCleaned {
        queue: String,
        removed: u64,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A new job was enqueued.
    JobEnqueued { job: Box<Job>, timestamp: DateTime<Utc> },
    /// A worker picked the job up.
    JobActive {
        job_id: JobId,
        queue: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        queue: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed.
    JobFailed {
        job_id: JobId,
        queue: String,
        error: String,
        attempts_made: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A failed attempt was scheduled for retry after a backoff.
    JobRetrying {
        job_id: JobId,
        queue: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The worker holding the job stopped renewing its lease.
    JobStalled {
        job_id: JobId,
        queue: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A not-yet-started job was removed.
    JobRemoved {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    WorkerConnected {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    WorkerDisconnected {
        worker_id: String,
        queue: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::QueueCreated { timestamp, .. }
            | JobEvent::QueueStateChanged { timestamp, .. }
            | JobEvent::QueueCleaned { timestamp, .. }
            | JobEvent::JobEnqueued { timestamp, .. }
            | JobEvent::JobActive { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobRetrying { timestamp, .. }
            | JobEvent::JobStalled { timestamp, .. }
            | JobEvent::JobRemoved { timestamp, .. }
            | JobEvent::WorkerConnected { timestamp, .. }
            | JobEvent::WorkerDisconnected { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue name associated with this event.
    pub fn queue(&self) -> &str {
        match self {
            JobEvent::JobEnqueued { job, .. } => &job.queue,
            JobEvent::QueueCreated { queue, .. }
            | JobEvent::QueueStateChanged { queue, .. }
            | JobEvent::QueueCleaned { queue, .. }
            | JobEvent::JobActive { queue, .. }
            | JobEvent::JobCompleted { queue, .. }
            | JobEvent::JobFailed { queue, .. }
            | JobEvent::JobRetrying { queue, .. }
            | JobEvent::JobStalled { queue, .. }
            | JobEvent::JobRemoved { queue, .. }
            | JobEvent::WorkerConnected { queue, .. }
            | JobEvent::WorkerDisconnected { queue, .. } => queue,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job, .. } => Some(job.id),
            JobEvent::JobActive { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobRetrying { job_id, .. }
            | JobEvent::JobStalled { job_id, .. }
            | JobEvent::JobRemoved { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::QueueCreated { queue, .. } => format!("Queue '{}' created", queue),
            JobEvent::QueueStateChanged {
                queue, new_state, ..
            } => format!("Queue {} -> {}", queue, new_state),
            JobEvent::QueueCleaned { queue, removed, .. } => {
                format!("Queue {} cleaned: {} jobs archived", queue, removed)
            }
            JobEvent::JobEnqueued { job, .. } => {
                format!("Job {} enqueued on {}", job.id, job.queue)
            }
            JobEvent::JobActive {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::JobRetrying {
                job_id,
                attempt,
                delay_ms,
                ..
            } => format!(
                "Job {} retrying (attempt {}) in {}ms",
                job_id, attempt, delay_ms
            ),
            JobEvent::JobStalled {
                job_id, worker_id, ..
            } => format!("Job {} stalled on {}", job_id, worker_id),
            JobEvent::JobRemoved { job_id, .. } => format!("Job {} removed", job_id),
            JobEvent::WorkerConnected {
                worker_id, queue, ..
            } => format!("Worker {} connected to {}", worker_id, queue),
            JobEvent::WorkerDisconnected {
                worker_id, queue, ..
            } => format!("Worker {} disconnected from {}", worker_id, queue),
        }
    }
}
