//! Cloneable front door to the queue actors.

use std::sync::Arc;
use std::time::Duration;

use db::Database;
use pipeline_core::{
    AdmissionGate, EnqueueOptions, Job, JobEvent, JobId, Queue, QueueConfig, QueueStats,
    StagePayload,
};
use ractor::ActorRef;
use tokio::sync::broadcast;

use crate::QueueError;
use crate::handler::JobHandler;
use crate::messages::{JobFilter, QueueMessage, SupervisorMessage};
use crate::rpc::{CALL_TIMEOUT, call};
use crate::supervisor::start_supervisor;

/// Handle to the job queue system: named durable queues, each served by a
/// queue actor and its workers.
#[derive(Clone)]
pub struct JobQueue {
    supervisor: ActorRef<SupervisorMessage>,
    event_tx: broadcast::Sender<JobEvent>,
    timeout: Duration,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("supervisor", &self.supervisor.get_id())
            .finish()
    }
}

impl JobQueue {
    /// Spawn the supervisor over `db`.
    pub async fn start(db: Database) -> Result<Self, QueueError> {
        let (event_tx, _) = broadcast::channel(1024);
        let (supervisor, _handle) = start_supervisor(db, event_tx.clone())
            .await
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        Ok(Self {
            supervisor,
            event_tx,
            timeout: CALL_TIMEOUT,
        })
    }

    /// Override how long calls wait for an actor reply.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribe to lifecycle events of every queue.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Create a queue, or get the running one with that name.
    pub async fn create_queue(
        &self,
        name: impl Into<String>,
        config: QueueConfig,
    ) -> Result<Queue, QueueError> {
        let name = name.into();
        call(
            &self.supervisor,
            |reply| SupervisorMessage::CreateQueue {
                name,
                config,
                reply,
            },
            self.timeout,
        )
        .await?
    }

    async fn queue_ref(&self, name: &str) -> Result<ActorRef<QueueMessage>, QueueError> {
        let lookup = name.to_string();
        call(
            &self.supervisor,
            |reply| SupervisorMessage::GetQueue {
                name: lookup,
                reply,
            },
            self.timeout,
        )
        .await?
        .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Names of all running queues.
    pub async fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        call(
            &self.supervisor,
            |reply| SupervisorMessage::ListQueues { reply },
            self.timeout,
        )
        .await
    }

    /// Add a job to `queue`.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: StagePayload,
        options: EnqueueOptions,
    ) -> Result<Job, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::Enqueue {
                payload,
                options,
                reply,
            },
            self.timeout,
        )
        .await?
    }

    /// Attach `concurrency` workers running `handler`. Each worker asks
    /// `gate` before taking a job. Returns the worker ids.
    pub async fn consume(
        &self,
        queue: &str,
        concurrency: u32,
        handler: Arc<dyn JobHandler>,
        gate: Arc<dyn AdmissionGate>,
    ) -> Result<Vec<String>, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::StartWorkers {
                count: concurrency.max(1),
                handler,
                gate,
                reply,
            },
            self.timeout,
        )
        .await?
    }

    /// Stop dispatching; waiting jobs are kept.
    pub async fn pause(&self, queue: &str) -> Result<(), QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(&actor, |reply| QueueMessage::Pause { reply }, self.timeout).await
    }

    pub async fn resume(&self, queue: &str) -> Result<(), QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(&actor, |reply| QueueMessage::Resume { reply }, self.timeout).await
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(&actor, |reply| QueueMessage::GetStats { reply }, self.timeout).await
    }

    pub async fn queue_info(&self, queue: &str) -> Result<Queue, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(&actor, |reply| QueueMessage::GetInfo { reply }, self.timeout).await
    }

    /// Re-queue every failed job. Returns how many were moved.
    pub async fn retry_failed(&self, queue: &str) -> Result<u64, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(&actor, |reply| QueueMessage::RetryFailed { reply }, self.timeout).await
    }

    /// Archive completed and failed jobs that finished more than `grace` ago.
    pub async fn clean(&self, queue: &str, grace: Duration) -> Result<u64, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::Clean { grace, reply },
            self.timeout,
        )
        .await?
    }

    /// Remove a job that has not started. `Ok(false)` if it is already
    /// active or finished.
    pub async fn remove_job(&self, queue: &str, job_id: JobId) -> Result<bool, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::RemoveJob { job_id, reply },
            self.timeout,
        )
        .await?
    }

    pub async fn get_job(&self, queue: &str, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::GetJob { job_id, reply },
            self.timeout,
        )
        .await
    }

    pub async fn list_jobs(&self, queue: &str, filter: JobFilter) -> Result<Vec<Job>, QueueError> {
        let actor = self.queue_ref(queue).await?;
        call(
            &actor,
            |reply| QueueMessage::ListJobs { filter, reply },
            self.timeout,
        )
        .await
    }

    /// Stop every queue and its workers.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        call(
            &self.supervisor,
            |reply| SupervisorMessage::Shutdown { reply },
            self.timeout,
        )
        .await
    }
}
