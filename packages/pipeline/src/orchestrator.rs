//! Turns candidate submissions into stage jobs and reports their progress.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use actors::{JobFilter, JobQueue, QueueError};
use admission::AdmissionController;
use db::{Database, DbError};
use pipeline_core::{
    Batch, BatchId, BatchProgress, CandidateRef, EnqueueOptions, Job, JobState, Priority,
    QueueConfig, QueueStats, Stage, StagePayload,
};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Result of one queue's share of a fan-out operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOutcome {
    pub queue: String,
    /// Jobs moved or archived. Zero for pause and resume.
    pub affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// What `cancel_batch` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCancellation {
    pub batch: Batch,
    /// Not-yet-started jobs taken off their queues.
    pub removed_jobs: u64,
}

#[derive(Debug, Clone, Copy)]
enum QueueOp {
    Pause,
    Resume,
    RetryFailed,
    Clean(Duration),
}

impl QueueOp {
    fn name(&self) -> &'static str {
        match self {
            QueueOp::Pause => "pause",
            QueueOp::Resume => "resume",
            QueueOp::RetryFailed => "retry_failed",
            QueueOp::Clean(_) => "clean",
        }
    }
}

/// Submits candidates to the six stage queues and aggregates progress.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    queue: JobQueue,
    db: Database,
    admission: AdmissionController,
    max_stage_retries: u32,
}

impl Orchestrator {
    pub fn new(queue: JobQueue, db: Database, admission: AdmissionController) -> Self {
        Self {
            queue,
            db,
            admission,
            max_stage_retries: 2,
        }
    }

    pub fn with_max_stage_retries(mut self, max: u32) -> Self {
        self.max_stage_retries = max;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Create the six stage queues with `config`, keeping any that exist.
    pub async fn ensure_stage_queues(&self, config: &QueueConfig) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            self.queue
                .create_queue(stage.queue_name(), config.clone())
                .await?;
        }
        Ok(())
    }

    /// Create a batch and enqueue all six stages for every candidate. If
    /// any enqueue fails, the jobs already queued are removed again and the
    /// batch is stored as failed.
    pub async fn submit_batch(
        &self,
        candidate_ids: Vec<String>,
        job_profile_id: &str,
    ) -> Result<Batch, PipelineError> {
        if job_profile_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "job profile id is required".into(),
            ));
        }
        if candidate_ids.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one candidate id is required".into(),
            ));
        }
        if candidate_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(PipelineError::InvalidRequest(
                "candidate ids must not be empty".into(),
            ));
        }
        {
            let mut seen = HashSet::with_capacity(candidate_ids.len());
            if let Some(duplicate) = candidate_ids.iter().find(|id| !seen.insert(id.as_str())) {
                return Err(PipelineError::InvalidRequest(format!(
                    "candidate {} is listed more than once",
                    duplicate
                )));
            }
        }
        self.admission.check_batch(candidate_ids.len())?;

        let mut batch = Batch::new(job_profile_id, candidate_ids);
        self.db.batches().save(&batch).await?;

        let mut enqueued = Vec::with_capacity(batch.candidate_ids.len() * Stage::ALL.len());
        for candidate_id in &batch.candidate_ids {
            let candidate =
                CandidateRef::new(candidate_id.as_str(), job_profile_id).with_batch(batch.id);
            for stage in Stage::ALL {
                let options = EnqueueOptions::new(stage.priority()).with_delay(stage.delay());
                let result = self
                    .queue
                    .enqueue(
                        stage.queue_name(),
                        StagePayload::for_stage(stage, candidate.clone()),
                        options,
                    )
                    .await;

                match result {
                    Ok(job) => enqueued.push(job),
                    Err(e) => {
                        tracing::error!(
                            batch_id = %batch.id,
                            candidate_id = %candidate_id,
                            stage = %stage,
                            "Failed to enqueue stage job: {}",
                            e
                        );
                        self.discard(&enqueued).await;
                        batch.mark_failed();
                        self.db.batches().save(&batch).await?;
                        return Err(e.into());
                    }
                }
            }
        }

        tracing::info!(
            batch_id = %batch.id,
            job_profile_id = %job_profile_id,
            candidates = batch.total_candidates,
            jobs = enqueued.len(),
            "Batch submitted"
        );
        Ok(batch)
    }

    /// Enqueue `start_stage` and every later stage for one candidate. The
    /// start stage runs immediately and later stages keep their offsets
    /// relative to it.
    pub async fn submit_single_candidate(
        &self,
        candidate_id: &str,
        job_profile_id: &str,
        start_stage: &str,
    ) -> Result<Vec<Job>, PipelineError> {
        let start: Stage = start_stage.parse()?;
        if candidate_id.trim().is_empty() || job_profile_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "candidate id and job profile id are required".into(),
            ));
        }
        self.admission.check_memory()?;

        let candidate = CandidateRef::new(candidate_id, job_profile_id);
        let offset = start.delay();
        let mut jobs = Vec::with_capacity(start.remaining().len());

        for stage in start.remaining() {
            let options = EnqueueOptions::new(stage.priority())
                .with_delay(stage.delay().saturating_sub(offset));
            let result = self
                .queue
                .enqueue(
                    stage.queue_name(),
                    StagePayload::for_stage(*stage, candidate.clone()),
                    options,
                )
                .await;
            match result {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::error!(
                        candidate_id = %candidate_id,
                        stage = %stage,
                        "Failed to enqueue stage job: {}",
                        e
                    );
                    self.discard(&jobs).await;
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            candidate_id = %candidate_id,
            start_stage = %start,
            jobs = jobs.len(),
            "Candidate submitted"
        );
        Ok(jobs)
    }

    /// Enqueue one urgent job for `stage`, counting it against the
    /// candidate's manual retry budget. The retry is reserved before the
    /// job is enqueued and given back if the enqueue fails.
    pub async fn retry_stage(
        &self,
        candidate_id: &str,
        job_profile_id: &str,
        stage: &str,
    ) -> Result<Job, PipelineError> {
        let stage: Stage = stage.parse()?;
        self.admission.check_memory()?;

        let retries = self.db.stage_retries();
        let Some(record) = retries
            .reserve(candidate_id, stage, self.max_stage_retries)
            .await?
        else {
            tracing::warn!(
                candidate_id = %candidate_id,
                stage = %stage,
                max = self.max_stage_retries,
                "Stage retry refused"
            );
            return Err(PipelineError::MaxRetriesReached {
                candidate_id: candidate_id.to_string(),
                stage,
                max: self.max_stage_retries,
            });
        };

        let enqueued = self
            .queue
            .enqueue(
                stage.queue_name(),
                StagePayload::for_stage(stage, CandidateRef::new(candidate_id, job_profile_id)),
                EnqueueOptions::new(Priority::URGENT),
            )
            .await;
        let job = match enqueued {
            Ok(job) => job,
            Err(e) => {
                if let Err(release) = retries.release(candidate_id, stage).await {
                    tracing::error!(
                        candidate_id = %candidate_id,
                        stage = %stage,
                        "Failed to give back stage retry: {}",
                        release
                    );
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            candidate_id = %candidate_id,
            stage = %stage,
            job_id = %job.id,
            retry_count = record.retry_count,
            "Stage retry enqueued"
        );
        Ok(job)
    }

    /// Take freshly enqueued jobs back off their queues.
    async fn discard(&self, jobs: &[Job]) {
        for job in jobs {
            if let Err(e) = self.queue.remove_job(&job.queue, job.id).await {
                tracing::warn!(queue = %job.queue, job_id = %job.id, "Failed to remove job: {}", e);
            }
        }
        if !jobs.is_empty() {
            tracing::info!(jobs = jobs.len(), "Discarded partially submitted jobs");
        }
    }

    /// Tally the batch's jobs across every stage queue and write the
    /// candidate counts back to the batch record.
    pub async fn batch_progress(&self, batch_id: BatchId) -> Result<BatchProgress, PipelineError> {
        let mut progress = BatchProgress::new(batch_id);
        // candidate -> (jobs seen, completed, failed)
        let mut candidates: HashMap<String, (u32, u32, u32)> = HashMap::new();

        for stage in Stage::ALL {
            let jobs = self
                .queue
                .list_jobs(stage.queue_name(), JobFilter::batch(batch_id))
                .await?;
            for job in jobs {
                let state = job.state();
                let completed = state == JobState::Completed;
                let failed = state == JobState::Failed;
                progress.record(stage, completed, failed);

                let entry = candidates.entry(job.candidate_id().to_string()).or_default();
                entry.0 += 1;
                entry.1 += u32::from(completed);
                entry.2 += u32::from(failed);
            }
        }

        if progress.total_jobs == 0 {
            return Err(PipelineError::BatchNotFound(batch_id));
        }

        if let Some(mut batch) = self.find_batch(batch_id).await? {
            let stages = Stage::ALL.len() as u32;
            let processed = candidates
                .values()
                .filter(|(seen, completed, _)| *seen == stages && completed == seen)
                .count() as u32;
            let failed = candidates
                .values()
                .filter(|(seen, completed, failed)| {
                    *failed > 0 && *seen == stages && completed + failed == *seen
                })
                .count() as u32;

            batch.record_progress(processed, failed);
            self.db.batches().save(&batch).await?;
            progress.batch = Some(batch);
        }

        Ok(progress)
    }

    pub async fn get_batch(&self, batch_id: BatchId) -> Result<Batch, PipelineError> {
        self.find_batch(batch_id)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_id))
    }

    async fn find_batch(&self, batch_id: BatchId) -> Result<Option<Batch>, PipelineError> {
        match self.db.batches().get(batch_id).await {
            Ok(batch) => Ok(Some(batch)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the batch's jobs that have not started and mark it failed.
    /// Active jobs run to completion.
    pub async fn cancel_batch(&self, batch_id: BatchId) -> Result<BatchCancellation, PipelineError> {
        let mut batch = self.get_batch(batch_id).await?;
        let mut removed_jobs = 0u64;

        for stage in Stage::ALL {
            let name = stage.queue_name();
            let jobs = match self.queue.list_jobs(name, JobFilter::batch(batch_id)).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::warn!(queue = %name, batch_id = %batch_id, "Failed to list jobs: {}", e);
                    continue;
                }
            };

            for job in jobs.into_iter().filter(|j| j.state().is_pending()) {
                match self.queue.remove_job(name, job.id).await {
                    Ok(true) => removed_jobs += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(queue = %name, job_id = %job.id, "Failed to remove job: {}", e)
                    }
                }
            }
        }

        batch.mark_failed();
        self.db.batches().save(&batch).await?;

        tracing::info!(batch_id = %batch_id, removed_jobs, "Batch cancelled");
        Ok(BatchCancellation {
            batch,
            removed_jobs,
        })
    }

    pub async fn pause_all(&self) -> Vec<QueueOutcome> {
        self.fan_out(QueueOp::Pause).await
    }

    pub async fn resume_all(&self) -> Vec<QueueOutcome> {
        self.fan_out(QueueOp::Resume).await
    }

    pub async fn retry_all_failed(&self) -> Vec<QueueOutcome> {
        self.fan_out(QueueOp::RetryFailed).await
    }

    /// Archive finished jobs older than `grace` on every stage queue.
    pub async fn cleanup(&self, grace: Duration) -> Vec<QueueOutcome> {
        self.fan_out(QueueOp::Clean(grace)).await
    }

    async fn apply(&self, queue: &str, op: QueueOp) -> Result<u64, QueueError> {
        match op {
            QueueOp::Pause => self.queue.pause(queue).await.map(|_| 0),
            QueueOp::Resume => self.queue.resume(queue).await.map(|_| 0),
            QueueOp::RetryFailed => self.queue.retry_failed(queue).await,
            QueueOp::Clean(grace) => self.queue.clean(queue, grace).await,
        }
    }

    async fn fan_out(&self, op: QueueOp) -> Vec<QueueOutcome> {
        let mut outcomes = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let queue = stage.queue_name();
            let outcome = match self.apply(queue, op).await {
                Ok(affected) => QueueOutcome {
                    queue: queue.to_string(),
                    affected,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(queue = %queue, operation = op.name(), "Queue operation failed: {}", e);
                    QueueOutcome {
                        queue: queue.to_string(),
                        affected: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let affected: u64 = outcomes.iter().map(|o| o.affected).sum();
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        tracing::info!(operation = op.name(), affected, failed, "Applied to all stage queues");
        outcomes
    }

    /// Counts for every stage queue.
    pub async fn queue_stats(&self) -> Result<BTreeMap<Stage, QueueStats>, PipelineError> {
        let mut stats = BTreeMap::new();
        for stage in Stage::ALL {
            stats.insert(stage, self.queue.stats(stage.queue_name()).await?);
        }
        Ok(stats)
    }
}
