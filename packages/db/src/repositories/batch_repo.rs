//! Batch repository.

use pipeline_core::{Batch, BatchId, BatchStatus};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

#[derive(Debug, Clone)]
pub struct BatchRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchRecord {
    status: BatchStatus,
    job_profile_id: String,
    batch: Batch,
}

impl From<&Batch> for BatchRecord {
    fn from(batch: &Batch) -> Self {
        Self {
            status: batch.status,
            job_profile_id: batch.job_profile_id.clone(),
            batch: batch.clone(),
        }
    }
}

impl BatchRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a batch.
    pub async fn save(&self, batch: &Batch) -> Result<(), DbError> {
        let _: Option<BatchRecord> = self
            .db
            .client()
            .upsert(("batch", batch.id.to_string()))
            .content(BatchRecord::from(batch))
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: BatchId) -> Result<Batch, DbError> {
        let record: Option<BatchRecord> =
            self.db.client().select(("batch", id.to_string())).await?;

        record
            .map(|r| r.batch)
            .ok_or_else(|| DbError::NotFound(format!("Batch not found: {}", id)))
    }

    /// Batches in the given status, oldest first.
    pub async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<Batch>, DbError> {
        let mut response = self
            .db
            .client()
            .query("SELECT * FROM batch WHERE status = $status")
            .bind(("status", status.as_str().to_string()))
            .await?;

        let records: Vec<BatchRecord> = response.take(0)?;
        let mut batches: Vec<Batch> = records.into_iter().map(|r| r.batch).collect();
        batches.sort_by_key(|b| b.started_at);
        Ok(batches)
    }
}
