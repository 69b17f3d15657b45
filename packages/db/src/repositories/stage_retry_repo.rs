//! Manual stage retry counters per candidate.

use chrono::{DateTime, Utc};
use pipeline_core::Stage;
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct StageRetryRepository {
    db: Database,
}

/// How often a candidate's stage was retried by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRetry {
    pub candidate_id: String,
    pub stage: Stage,
    pub retry_count: u32,
    pub last_retry_at: DateTime<Utc>,
}

fn record_key(candidate_id: &str, stage: Stage) -> String {
    format!("{}_{}", candidate_id, stage.as_str())
}

impl StageRetryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current count, zero if the stage was never retried.
    pub async fn count(&self, candidate_id: &str, stage: Stage) -> Result<u32, DbError> {
        let record: Option<StageRetry> = self
            .db
            .client()
            .select(("stage_retry", record_key(candidate_id, stage)))
            .await?;

        Ok(record.map(|r| r.retry_count).unwrap_or(0))
    }

    /// Bump the counter and return the stored record.
    pub async fn increment(&self, candidate_id: &str, stage: Stage) -> Result<StageRetry, DbError> {
        let _guard = self.db.counter_lock().lock().await;
        let current = self.count(candidate_id, stage).await?;
        self.store(candidate_id, stage, current + 1).await
    }

    /// Take one retry from the budget. `None` once the count has reached
    /// `max`; the counter is left untouched in that case.
    pub async fn reserve(
        &self,
        candidate_id: &str,
        stage: Stage,
        max: u32,
    ) -> Result<Option<StageRetry>, DbError> {
        let _guard = self.db.counter_lock().lock().await;
        let current = self.count(candidate_id, stage).await?;
        if current >= max {
            return Ok(None);
        }
        self.store(candidate_id, stage, current + 1).await.map(Some)
    }

    /// Give back a reserved retry whose job was never enqueued.
    pub async fn release(&self, candidate_id: &str, stage: Stage) -> Result<u32, DbError> {
        let _guard = self.db.counter_lock().lock().await;
        let current = self.count(candidate_id, stage).await?;
        let next = current.saturating_sub(1);
        self.store(candidate_id, stage, next).await?;
        Ok(next)
    }

    async fn store(&self, candidate_id: &str, stage: Stage, retry_count: u32) -> Result<StageRetry, DbError> {
        let next = StageRetry {
            candidate_id: candidate_id.to_string(),
            stage,
            retry_count,
            last_retry_at: Utc::now(),
        };

        let record: Option<StageRetry> = self
            .db
            .client()
            .upsert(("stage_retry", record_key(candidate_id, stage)))
            .content(next)
            .await?;

        record.ok_or_else(|| {
            DbError::Query(format!(
                "Failed to store retry count for {} / {}",
                candidate_id, stage
            ))
        })
    }

    /// Set the counter explicitly (used when seeding from an external store).
    pub async fn set(&self, candidate_id: &str, stage: Stage, retry_count: u32) -> Result<(), DbError> {
        let _guard = self.db.counter_lock().lock().await;
        self.store(candidate_id, stage, retry_count).await?;
        Ok(())
    }
}
