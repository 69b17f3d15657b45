//! Queue repository for CRUD operations.

use pipeline_core::{Queue, QueueState};

use crate::{Database, DbError};

/// Repository for queue persistence operations. Queues are keyed by name.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    db: Database,
}

impl QueueRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a queue record.
    pub async fn upsert(&self, queue: &Queue) -> Result<Queue, DbError> {
        let record: Option<Queue> = self
            .db
            .client()
            .upsert(("queue", queue.name.clone()))
            .content(queue.clone())
            .await?;

        record.ok_or_else(|| DbError::Query(format!("Failed to save queue {}", queue.name)))
    }

    /// Get a queue by name.
    pub async fn get_by_name(&self, name: &str) -> Result<Queue, DbError> {
        let record: Option<Queue> = self.db.client().select(("queue", name.to_string())).await?;

        record.ok_or_else(|| DbError::NotFound(format!("Queue not found: {}", name)))
    }

    /// Get a queue by name, `None` if it was never stored.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Queue>, DbError> {
        match self.get_by_name(name).await {
            Ok(queue) => Ok(Some(queue)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List all queues.
    pub async fn list(&self) -> Result<Vec<Queue>, DbError> {
        let mut queues: Vec<Queue> = self.db.client().select("queue").await?;
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(queues)
    }

    /// Update a queue's state.
    pub async fn update_state(&self, name: &str, state: QueueState) -> Result<Queue, DbError> {
        let mut queue = self.get_by_name(name).await?;
        queue.state = state;
        queue.updated_at = chrono::Utc::now();
        self.upsert(&queue).await
    }

    /// Delete a queue record.
    pub async fn delete(&self, name: &str) -> Result<(), DbError> {
        let _: Option<Queue> = self.db.client().delete(("queue", name.to_string())).await?;
        Ok(())
    }
}
