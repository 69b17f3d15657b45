//! Message types for actor communication.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pipeline_core::{
    AdmissionGate, BatchId, EnqueueOptions, Job, JobId, JobResult, JobState, Queue, QueueConfig,
    QueueStats, StagePayload,
};
use ractor::{ActorRef, RpcReplyPort};

use crate::QueueError;
use crate::handler::{HandlerResult, JobHandler};

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub batch_id: Option<BatchId>,
    pub candidate_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn batch(batch_id: BatchId) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.state.is_none_or(|s| job.state() == s)
            && self.batch_id.is_none_or(|b| job.batch_id() == Some(b))
            && self
                .candidate_id
                .as_deref()
                .is_none_or(|c| job.candidate_id() == c)
    }
}

/// Messages for the QueueActor.
pub enum QueueMessage {
    /// Enqueue a new job.
    Enqueue {
        payload: StagePayload,
        options: EnqueueOptions,
        reply: RpcReplyPort<Result<Job, QueueError>>,
    },

    /// Request the next ready job for a worker.
    RequestJob {
        worker_id: String,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Worker could not start the job; put it back without using an attempt.
    ReleaseJob { job_id: JobId, worker_id: String },

    /// Lease renewal from the worker holding the job.
    Heartbeat { job_id: JobId, worker_id: String },

    /// Report job completion.
    JobCompleted {
        job_id: JobId,
        worker_id: String,
        result: JobResult,
    },

    /// Report job failure.
    JobFailed {
        job_id: JobId,
        worker_id: String,
        error: String,
    },

    /// Move every failed job back to waiting.
    RetryFailed { reply: RpcReplyPort<u64> },

    /// Archive terminal jobs that finished more than `grace` ago.
    Clean {
        grace: Duration,
        reply: RpcReplyPort<Result<u64, QueueError>>,
    },

    /// Remove a job that has not started yet.
    RemoveJob {
        job_id: JobId,
        reply: RpcReplyPort<Result<bool, QueueError>>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// List jobs in this queue.
    ListJobs {
        filter: JobFilter,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Attach workers running `handler`, gated by `gate`.
    StartWorkers {
        count: u32,
        handler: Arc<dyn JobHandler>,
        gate: Arc<dyn AdmissionGate>,
        reply: RpcReplyPort<Result<Vec<String>, QueueError>>,
    },

    /// Pause the queue.
    Pause { reply: RpcReplyPort<()> },

    /// Resume the queue.
    Resume { reply: RpcReplyPort<()> },

    /// Get queue info.
    GetInfo { reply: RpcReplyPort<Queue> },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Stop workers and the queue actor.
    Shutdown { reply: RpcReplyPort<()> },

    /// Periodic tick for housekeeping.
    Tick,
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMessage::Enqueue { payload, .. } => f
                .debug_struct("Enqueue")
                .field("stage", &payload.stage())
                .finish_non_exhaustive(),
            QueueMessage::RequestJob { worker_id, .. } => {
                write!(f, "RequestJob({})", worker_id)
            }
            QueueMessage::ReleaseJob { job_id, .. } => write!(f, "ReleaseJob({})", job_id),
            QueueMessage::Heartbeat { job_id, .. } => write!(f, "Heartbeat({})", job_id),
            QueueMessage::JobCompleted { job_id, .. } => write!(f, "JobCompleted({})", job_id),
            QueueMessage::JobFailed { job_id, error, .. } => {
                write!(f, "JobFailed({}, {})", job_id, error)
            }
            QueueMessage::RetryFailed { .. } => f.write_str("RetryFailed"),
            QueueMessage::Clean { grace, .. } => write!(f, "Clean({:?})", grace),
            QueueMessage::RemoveJob { job_id, .. } => write!(f, "RemoveJob({})", job_id),
            QueueMessage::GetJob { job_id, .. } => write!(f, "GetJob({})", job_id),
            QueueMessage::ListJobs { filter, .. } => write!(f, "ListJobs({:?})", filter),
            QueueMessage::StartWorkers { count, .. } => write!(f, "StartWorkers({})", count),
            QueueMessage::Pause { .. } => f.write_str("Pause"),
            QueueMessage::Resume { .. } => f.write_str("Resume"),
            QueueMessage::GetInfo { .. } => f.write_str("GetInfo"),
            QueueMessage::GetStats { .. } => f.write_str("GetStats"),
            QueueMessage::Shutdown { .. } => f.write_str("Shutdown"),
            QueueMessage::Tick => f.write_str("Tick"),
        }
    }
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Poll tick: renew the current lease or ask for work.
    Poll,

    /// The handler task for `job_id` returned.
    JobFinished {
        job_id: JobId,
        started: std::time::Instant,
        outcome: HandlerResult,
    },

    /// Check if worker is idle.
    IsIdle { reply: RpcReplyPort<bool> },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Create a queue, or return the running one with that name.
    CreateQueue {
        name: String,
        config: QueueConfig,
        reply: RpcReplyPort<Result<Queue, QueueError>>,
    },

    /// Look up a queue actor by name.
    GetQueue {
        name: String,
        reply: RpcReplyPort<Option<ActorRef<QueueMessage>>>,
    },

    /// Names of all running queues.
    ListQueues { reply: RpcReplyPort<Vec<String>> },

    /// Shutdown all queues.
    Shutdown { reply: RpcReplyPort<()> },
}
