//! Job repository for CRUD operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pipeline_core::{BatchId, Job, JobId, JobStatus, QueueStats, Stage};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    db: Database,
}

/// Stored shape of a job. Lookup fields are lifted next to the job so they
/// can be indexed.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    queue: String,
    state: String,
    #[serde(default)]
    batch_id: Option<String>,
    candidate_id: String,
    job: Job,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            queue: job.queue.clone(),
            state: job.status.as_str().to_string(),
            batch_id: job.batch_id().map(|id| id.to_string()),
            candidate_id: job.candidate_id().to_string(),
            job: job.clone(),
        }
    }
}

/// Job history record for archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub job_id: String,
    pub queue: String,
    pub stage: Stage,
    pub candidate_id: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub final_status: String,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub result_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl JobHistoryRecord {
    /// History row for a terminal job, `None` for anything still in flight.
    fn from_job(job: &Job) -> Option<Self> {
        let (final_status, duration_ms, error, result_summary) = match &job.status {
            JobStatus::Completed {
                started_at,
                completed_at,
                result,
            } => {
                let duration = (*completed_at - *started_at).num_milliseconds().max(0) as u64;
                ("completed", Some(duration), None, Some(result.summary.clone()))
            }
            JobStatus::Failed { reason, .. } => ("failed", None, Some(reason.clone()), None),
            _ => return None,
        };

        Some(Self {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            stage: job.stage(),
            candidate_id: job.candidate_id().to_string(),
            batch_id: job.batch_id().map(|id| id.to_string()),
            final_status: final_status.to_string(),
            attempts: job.attempts_made,
            duration_ms,
            error,
            result_summary,
            created_at: job.created_at,
            archived_at: Utc::now(),
        })
    }
}

fn sorted(records: Vec<JobRecord>) -> Vec<Job> {
    let mut jobs: Vec<Job> = records.into_iter().map(|r| r.job).collect();
    jobs.sort_by_key(|job| (job.created_at, job.id.0));
    jobs
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a job.
    pub async fn save(&self, job: &Job) -> Result<(), DbError> {
        let _: Option<JobRecord> = self
            .db
            .client()
            .upsert(("job", job.id.to_string()))
            .content(JobRecord::from(job))
            .await?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.client().select(("job", id.to_string())).await?;

        record
            .map(|r| r.job)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// All live jobs of a queue, oldest first.
    pub async fn list_for_queue(&self, queue: &str) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM job WHERE queue = $queue")
            .bind(("queue", queue.to_string()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(sorted(records))
    }

    /// All live jobs carrying `batch_id`, across queues.
    pub async fn list_for_batch(&self, batch_id: BatchId) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM job WHERE batch_id = $batch_id")
            .bind(("batch_id", batch_id.to_string()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        Ok(sorted(records))
    }

    /// Delete a job.
    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        let _: Option<JobRecord> = self.db.client().delete(("job", id.to_string())).await?;
        Ok(())
    }

    /// Move a terminal job to `job_history`. Non-terminal jobs are left alone
    /// and `false` is returned.
    pub async fn archive(&self, job: &Job) -> Result<bool, DbError> {
        let Some(history) = JobHistoryRecord::from_job(job) else {
            return Ok(false);
        };

        self.db
            .client()
            .query("CREATE job_history CONTENT $record RETURN NONE")
            .bind(("record", history))
            .await?
            .check()?;

        self.delete(job.id).await?;

        Ok(true)
    }

    /// Archived jobs of a queue.
    pub async fn history_for_queue(&self, queue: &str) -> Result<Vec<JobHistoryRecord>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM job_history WHERE queue = $queue")
            .bind(("queue", queue.to_string()))
            .await?;

        let mut records: Vec<JobHistoryRecord> = response.take(0)?;
        records.sort_by_key(|r| r.archived_at);
        Ok(records)
    }

    /// Count jobs by state for a queue.
    pub async fn count_by_state(&self, queue: &str) -> Result<HashMap<String, u64>, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                SELECT state, count() AS count
                FROM job
                WHERE queue = $queue
                GROUP BY state
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct StateCount {
            state: Option<String>,
            count: i64,
        }

        let counts: Vec<StateCount> = response.take(0)?;

        Ok(counts
            .into_iter()
            .filter_map(|c| c.state.map(|state| (state, c.count.max(0) as u64)))
            .collect())
    }

    /// Queue statistics from stored job counts.
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats, DbError> {
        let counts = self.count_by_state(queue).await?;
        let get = |state: &str| counts.get(state).copied().unwrap_or(0);

        Ok(QueueStats {
            waiting: get("waiting"),
            active: get("active"),
            completed: get("completed"),
            failed: get("failed"),
            delayed: get("delayed"),
            paused: get("paused"),
        })
    }
}
