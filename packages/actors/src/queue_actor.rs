//! Queue actor for managing the jobs of one named queue.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use db::Database;
use db::repositories::{JobRepository, QueueRepository};
use pipeline_core::{
    AdmissionGate, Job, JobEvent, JobId, JobState, JobStatus, Priority, Queue, QueueState,
    QueueStats,
};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::QueueError;
use crate::handler::JobHandler;
use crate::messages::{QueueMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Heap entry ordering waiting jobs: higher priority first, older jobs first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WaitingEntry {
    priority: Priority,
    created_at: DateTime<Utc>,
    id: JobId,
}

impl WaitingEntry {
    fn of(job: &Job) -> Self {
        Self {
            priority: job.priority,
            created_at: job.created_at,
            id: job.id,
        }
    }
}

impl PartialOrd for WaitingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// A worker's claim on an active job.
#[derive(Debug)]
struct Lease {
    worker_id: String,
    renewed_at: Instant,
}

struct WorkerSlot {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
}

/// What `consume` attached, kept so failed workers can be replaced.
struct Consumer {
    handler: Arc<dyn JobHandler>,
    gate: Arc<dyn AdmissionGate>,
}

/// Arguments for spawning a queue actor.
pub struct QueueActorArgs {
    pub queue: Queue,
    pub db: Database,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the queue actor.
pub struct QueueActorState {
    queue: Queue,
    jobs_repo: JobRepository,
    queue_repo: QueueRepository,
    /// Every job still owned by the queue, terminal ones included.
    jobs: HashMap<JobId, Job>,
    /// Ready jobs. Entries are checked against `jobs` when popped.
    waiting: BinaryHeap<WaitingEntry>,
    /// Delayed jobs by due time.
    delayed: BinaryHeap<Reverse<(DateTime<Utc>, JobId)>>,
    leases: HashMap<JobId, Lease>,
    workers: HashMap<ActorId, WorkerSlot>,
    consumer: Option<Consumer>,
    worker_counter: u64,
    stopping: bool,
    event_tx: broadcast::Sender<JobEvent>,
}

impl QueueActorState {
    fn new(args: QueueActorArgs) -> Self {
        Self {
            queue: args.queue,
            jobs_repo: args.db.jobs(),
            queue_repo: args.db.queues(),
            jobs: HashMap::new(),
            waiting: BinaryHeap::new(),
            delayed: BinaryHeap::new(),
            leases: HashMap::new(),
            workers: HashMap::new(),
            consumer: None,
            worker_counter: 0,
            stopping: false,
            event_tx: args.event_tx,
        }
    }

    fn name(&self) -> String {
        self.queue.name.clone()
    }

    /// Broadcast an event. Having no subscribers is fine.
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.jobs_repo.save(job).await {
            tracing::warn!(job_id = %job.id, queue = %self.queue.name, "Failed to persist job: {}", e);
        }
    }

    async fn persist_queue(&self) {
        if let Err(e) = self.queue_repo.upsert(&self.queue).await {
            tracing::warn!(queue = %self.queue.name, "Failed to persist queue state: {}", e);
        }
    }

    /// Status for a job that is ready to run.
    fn ready_status(&self) -> JobStatus {
        if self.queue.is_dispatching() {
            JobStatus::Waiting
        } else {
            JobStatus::Paused
        }
    }

    /// Take ownership of `job` and index it by its status.
    fn schedule(&mut self, job: Job) {
        match &job.status {
            JobStatus::Waiting => self.waiting.push(WaitingEntry::of(&job)),
            JobStatus::Delayed { until } => self.delayed.push(Reverse((*until, job.id))),
            _ => {}
        }
        self.jobs.insert(job.id, job);
    }

    /// Move delayed jobs whose time has come to waiting (or paused).
    async fn promote_due(&mut self, now: DateTime<Utc>) {
        let ready = self.ready_status();
        let mut promoted = Vec::new();

        while let Some(Reverse((until, id))) = self.delayed.peek().cloned() {
            if until > now {
                break;
            }
            self.delayed.pop();

            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if !job.is_due(now) {
                continue;
            }
            job.status = ready.clone();
            job.updated_at = now;
            promoted.push(job.clone());
        }

        for job in promoted {
            self.persist(&job).await;
            self.schedule(job);
        }
    }

    /// Pop the best waiting job, skipping stale heap entries.
    fn next_waiting(&mut self) -> Option<JobId> {
        while let Some(entry) = self.waiting.pop() {
            if self
                .jobs
                .get(&entry.id)
                .is_some_and(|job| job.state() == JobState::Waiting)
            {
                return Some(entry.id);
            }
        }
        None
    }

    fn holds_lease(&self, job_id: JobId, worker_id: &str) -> bool {
        self.leases
            .get(&job_id)
            .is_some_and(|lease| lease.worker_id == worker_id)
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.values() {
            match job.state() {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Paused => stats.paused += 1,
            }
        }
        stats
    }

    /// Put an active job back after its worker went silent or died.
    async fn stall(&mut self, job_id: JobId) {
        self.leases.remove(&job_id);
        let max_stalled = self.queue.config.max_stalled_count;
        let ready = self.ready_status();
        let now = Utc::now();

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let worker_id = match &job.status {
            JobStatus::Active { worker_id, .. } => worker_id.clone(),
            _ => return,
        };

        job.stalled_count += 1;
        job.attempts_made = job.attempts_made.saturating_sub(1);
        job.updated_at = now;
        if job.stalled_count > max_stalled {
            job.status = JobStatus::Failed {
                failed_at: now,
                reason: STALLED_REASON.to_string(),
            };
            job.last_error = Some(STALLED_REASON.to_string());
        } else {
            job.status = ready;
        }
        let job = job.clone();

        tracing::warn!(
            job_id = %job_id,
            queue = %self.queue.name,
            worker_id = %worker_id,
            stalled_count = job.stalled_count,
            "Job stalled"
        );

        self.persist(&job).await;
        self.broadcast(JobEvent::JobStalled {
            job_id,
            queue: self.name(),
            worker_id,
            timestamp: now,
        });
        self.schedule(job);
    }

    /// Requeue every job leased by `worker_id`.
    async fn recover_worker_jobs(&mut self, worker_id: &str) {
        let held: Vec<JobId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.worker_id == worker_id)
            .map(|(id, _)| *id)
            .collect();
        for job_id in held {
            self.stall(job_id).await;
        }
    }

    /// Archive terminal jobs that finished at or before `cutoff`.
    async fn archive_finished_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let expired: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.status.finished_at().is_some_and(|at| at <= cutoff))
            .cloned()
            .collect();

        let mut removed = 0;
        for job in expired {
            self.jobs_repo.archive(&job).await?;
            self.jobs.remove(&job.id);
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(queue = %self.queue.name, removed, "Archived finished jobs");
            self.broadcast(JobEvent::QueueCleaned {
                queue: self.name(),
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Reload the queue's jobs from the store.
    async fn recover(&mut self) -> Result<(), QueueError> {
        let stored = self.jobs_repo.list_for_queue(&self.queue.name).await?;
        let ready = self.ready_status();
        let mut interrupted = Vec::new();

        for mut job in stored {
            match job.state() {
                JobState::Active => interrupted.push(job.id),
                JobState::Waiting | JobState::Paused => job.status = ready.clone(),
                _ => {}
            }
            self.schedule(job);
        }

        if !self.jobs.is_empty() {
            tracing::info!(
                queue = %self.queue.name,
                jobs = self.jobs.len(),
                interrupted = interrupted.len(),
                "Recovered jobs from store"
            );
        }

        for job_id in interrupted {
            self.stall(job_id).await;
        }
        Ok(())
    }

    async fn spawn_worker(&mut self, myself: &ActorRef<QueueMessage>) -> Result<String, QueueError> {
        let Some(consumer) = &self.consumer else {
            return Err(QueueError::NoConsumer(self.name()));
        };

        self.worker_counter += 1;
        let worker_id = format!("{}-worker-{}", self.queue.name, self.worker_counter);
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            queue_name: self.name(),
            queue: myself.clone(),
            handler: consumer.handler.clone(),
            gate: consumer.gate.clone(),
            poll_interval: self.queue.config.poll_interval(),
            event_tx: self.event_tx.clone(),
        };

        let (actor, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
            .await
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        self.workers.insert(
            actor.get_id(),
            WorkerSlot {
                worker_id: worker_id.clone(),
                actor,
            },
        );
        Ok(worker_id)
    }

    async fn set_dispatching(&mut self, dispatching: bool) {
        let old_state = self.queue.state;
        let new_state = if dispatching {
            QueueState::Running
        } else {
            QueueState::Paused
        };
        if old_state == new_state {
            return;
        }

        let now = Utc::now();
        self.queue.state = new_state;
        self.queue.updated_at = now;
        self.persist_queue().await;

        let (from, to) = if dispatching {
            (JobState::Paused, JobStatus::Waiting)
        } else {
            (JobState::Waiting, JobStatus::Paused)
        };
        let moved: Vec<Job> = self
            .jobs
            .values_mut()
            .filter(|job| job.state() == from)
            .map(|job| {
                job.status = to.clone();
                job.updated_at = now;
                job.clone()
            })
            .collect();
        for job in moved {
            self.persist(&job).await;
            self.schedule(job);
        }

        tracing::info!(queue = %self.queue.name, "Queue {} -> {}", old_state, new_state);
        self.broadcast(JobEvent::QueueStateChanged {
            queue: self.name(),
            old_state,
            new_state,
            timestamp: now,
        });
    }
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.queue.name);

        let mut state = QueueActorState::new(args);
        state.recover().await?;

        // Start periodic tick
        let tick = state.queue.config.tick_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                if myself_clone.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Queue actor stopped: {}", state.queue.name);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue {
                payload,
                mut options,
                reply,
            } => {
                if !state.queue.is_accepting_jobs() || state.stopping {
                    let _ = reply.send(Err(QueueError::QueueStopped(state.name())));
                    return Ok(());
                }

                options
                    .max_attempts
                    .get_or_insert(state.queue.config.default_max_attempts);
                let mut job = Job::new(state.name(), payload, &options);
                if job.state() == JobState::Waiting {
                    job.status = state.ready_status();
                }

                if let Err(e) = state.jobs_repo.save(&job).await {
                    let _ = reply.send(Err(e.into()));
                    return Ok(());
                }

                tracing::debug!(
                    job_id = %job.id,
                    queue = %state.queue.name,
                    priority = %job.priority,
                    delay_ms = job.delay_ms,
                    "Job enqueued"
                );
                state.broadcast(JobEvent::JobEnqueued {
                    job: Box::new(job.clone()),
                    timestamp: Utc::now(),
                });
                state.schedule(job.clone());

                let _ = reply.send(Ok(job));
            }

            QueueMessage::RequestJob { worker_id, reply } => {
                let now = Utc::now();
                state.promote_due(now).await;

                if !state.queue.is_dispatching()
                    || state.stopping
                    || state.leases.len() >= state.queue.config.concurrency as usize
                {
                    let _ = reply.send(None);
                    return Ok(());
                }

                let Some(job_id) = state.next_waiting() else {
                    let _ = reply.send(None);
                    return Ok(());
                };
                let Some(job) = state.jobs.get_mut(&job_id) else {
                    let _ = reply.send(None);
                    return Ok(());
                };

                job.attempts_made = job.attempts_made.saturating_add(1);
                job.status = JobStatus::Active {
                    started_at: now,
                    worker_id: worker_id.clone(),
                };
                job.updated_at = now;
                let job = job.clone();

                state.leases.insert(
                    job_id,
                    Lease {
                        worker_id: worker_id.clone(),
                        renewed_at: Instant::now(),
                    },
                );
                state.persist(&job).await;

                state.broadcast(JobEvent::JobActive {
                    job_id,
                    queue: state.name(),
                    worker_id,
                    timestamp: now,
                });

                let _ = reply.send(Some(job));
            }

            QueueMessage::ReleaseJob { job_id, worker_id } => {
                if !state.holds_lease(job_id, &worker_id) {
                    return Ok(());
                }
                state.leases.remove(&job_id);

                let ready = state.ready_status();
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    job.attempts_made = job.attempts_made.saturating_sub(1);
                    job.status = ready;
                    job.updated_at = Utc::now();
                    let job = job.clone();
                    tracing::debug!(job_id = %job_id, worker_id = %worker_id, "Job released without running");
                    state.persist(&job).await;
                    state.schedule(job);
                }
            }

            QueueMessage::Heartbeat { job_id, worker_id } => {
                if let Some(lease) = state.leases.get_mut(&job_id)
                    && lease.worker_id == worker_id
                {
                    lease.renewed_at = Instant::now();
                }
            }

            QueueMessage::JobCompleted {
                job_id,
                worker_id,
                result,
            } => {
                if !state.holds_lease(job_id, &worker_id) {
                    tracing::debug!(job_id = %job_id, worker_id = %worker_id, "Ignoring completion from stale worker");
                    return Ok(());
                }
                state.leases.remove(&job_id);

                let Some(job) = state.jobs.get_mut(&job_id) else {
                    return Ok(());
                };
                let now = Utc::now();
                let started_at = match &job.status {
                    JobStatus::Active { started_at, .. } => *started_at,
                    _ => now,
                };
                let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;

                job.status = JobStatus::Completed {
                    started_at,
                    completed_at: now,
                    result,
                };
                job.updated_at = now;
                let job = job.clone();

                state.persist(&job).await;
                state.broadcast(JobEvent::JobCompleted {
                    job_id,
                    queue: state.name(),
                    duration_ms,
                    timestamp: now,
                });
            }

            QueueMessage::JobFailed {
                job_id,
                worker_id,
                error,
            } => {
                if !state.holds_lease(job_id, &worker_id) {
                    tracing::debug!(job_id = %job_id, worker_id = %worker_id, "Ignoring failure from stale worker");
                    return Ok(());
                }
                state.leases.remove(&job_id);

                let backoff = state.queue.config.backoff;
                let Some(job) = state.jobs.get_mut(&job_id) else {
                    return Ok(());
                };
                let now = Utc::now();
                let attempts_made = job.attempts_made;
                let will_retry = job.can_retry();

                job.last_error = Some(error.clone());
                job.updated_at = now;
                let delay = backoff.delay_for(attempts_made);
                if will_retry {
                    job.status = JobStatus::Delayed {
                        until: now
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                    };
                } else {
                    job.status = JobStatus::Failed {
                        failed_at: now,
                        reason: error.clone(),
                    };
                }
                let job = job.clone();

                tracing::warn!(
                    job_id = %job_id,
                    queue = %state.queue.name,
                    attempts_made,
                    will_retry,
                    "Job failed: {}",
                    error
                );

                state.persist(&job).await;
                state.broadcast(JobEvent::JobFailed {
                    job_id,
                    queue: state.name(),
                    error,
                    attempts_made,
                    will_retry,
                    timestamp: now,
                });
                if will_retry {
                    state.broadcast(JobEvent::JobRetrying {
                        job_id,
                        queue: state.name(),
                        attempt: attempts_made + 1,
                        delay_ms: delay.as_millis() as u64,
                        timestamp: now,
                    });
                }
                state.schedule(job);
            }

            QueueMessage::RetryFailed { reply } => {
                let now = Utc::now();
                let ready = state.ready_status();
                let retried: Vec<Job> = state
                    .jobs
                    .values_mut()
                    .filter(|job| job.state() == JobState::Failed)
                    .map(|job| {
                        job.attempts_made = 0;
                        job.stalled_count = 0;
                        job.status = ready.clone();
                        job.updated_at = now;
                        job.clone()
                    })
                    .collect();

                let count = retried.len() as u64;
                for job in retried {
                    state.persist(&job).await;
                    state.schedule(job);
                }
                if count > 0 {
                    tracing::info!(queue = %state.queue.name, count, "Retrying failed jobs");
                }

                let _ = reply.send(count);
            }

            QueueMessage::Clean { grace, reply } => {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
                let _ = reply.send(state.archive_finished_before(cutoff).await);
            }

            QueueMessage::RemoveJob { job_id, reply } => {
                let Some(job) = state.jobs.get(&job_id) else {
                    let _ = reply.send(Err(QueueError::JobNotFound(job_id)));
                    return Ok(());
                };
                if !job.state().is_pending() {
                    let _ = reply.send(Ok(false));
                    return Ok(());
                }

                if let Err(e) = state.jobs_repo.delete(job_id).await {
                    let _ = reply.send(Err(e.into()));
                    return Ok(());
                }
                state.jobs.remove(&job_id);
                state.broadcast(JobEvent::JobRemoved {
                    job_id,
                    queue: state.name(),
                    timestamp: Utc::now(),
                });

                let _ = reply.send(Ok(true));
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.jobs.get(&job_id).cloned());
            }

            QueueMessage::ListJobs { filter, reply } => {
                let mut jobs: Vec<Job> = state
                    .jobs
                    .values()
                    .filter(|job| filter.matches(job))
                    .cloned()
                    .collect();
                jobs.sort_by_key(|job| (job.created_at, job.id.0));
                if let Some(limit) = filter.limit {
                    jobs.truncate(limit);
                }
                let _ = reply.send(jobs);
            }

            QueueMessage::StartWorkers {
                count,
                handler,
                gate,
                reply,
            } => {
                state.consumer = Some(Consumer { handler, gate });

                let mut started = Vec::new();
                for _ in 0..count {
                    match state.spawn_worker(&myself).await {
                        Ok(worker_id) => started.push(worker_id),
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            return Ok(());
                        }
                    }
                }

                state.queue.config.concurrency = state.workers.len().max(1) as u32;
                state.persist_queue().await;
                tracing::info!(
                    queue = %state.queue.name,
                    workers = state.workers.len(),
                    "Workers attached"
                );

                let _ = reply.send(Ok(started));
            }

            QueueMessage::Pause { reply } => {
                state.set_dispatching(false).await;
                let _ = reply.send(());
            }

            QueueMessage::Resume { reply } => {
                state.set_dispatching(true).await;
                let _ = reply.send(());
            }

            QueueMessage::GetInfo { reply } => {
                let _ = reply.send(state.queue.clone());
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }

            QueueMessage::Shutdown { reply } => {
                tracing::info!("Shutting down queue: {}", state.queue.name);
                state.stopping = true;
                for slot in state.workers.values() {
                    let _ = slot.actor.send_message(WorkerMessage::Shutdown);
                }
                let _ = reply.send(());
                myself.stop(None);
                return Ok(());
            }

            QueueMessage::Tick => {
                let now = Utc::now();
                state.promote_due(now).await;

                let timeout = state.queue.config.stalled_timeout();
                let stalled: Vec<JobId> = state
                    .leases
                    .iter()
                    .filter(|(_, lease)| lease.renewed_at.elapsed() > timeout)
                    .map(|(id, _)| *id)
                    .collect();
                for job_id in stalled {
                    state.stall(job_id).await;
                }

                let retention = chrono::Duration::from_std(state.queue.config.retention())
                    .unwrap_or_else(|_| chrono::Duration::days(1));
                if let Err(e) = state.archive_finished_before(now - retention).await {
                    tracing::warn!(queue = %state.queue.name, "Retention sweep failed: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(slot) = state.workers.remove(&cell.get_id()) {
                    tracing::debug!(
                        worker_id = %slot.worker_id,
                        "Worker terminated: {:?}",
                        reason
                    );
                    state.recover_worker_jobs(&slot.worker_id).await;
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                if let Some(slot) = state.workers.remove(&cell.get_id()) {
                    tracing::error!(worker_id = %slot.worker_id, "Worker failed: {}", err);
                    state.recover_worker_jobs(&slot.worker_id).await;

                    if !state.stopping {
                        match state.spawn_worker(&myself).await {
                            Ok(worker_id) => {
                                tracing::info!(worker_id = %worker_id, "Replacement worker started")
                            }
                            Err(e) => tracing::error!("Failed to replace worker: {}", e),
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
