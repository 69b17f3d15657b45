//! Database schema definitions using SurrealQL.
//!
//! Records embed serde-encoded domain objects, so tables are schemaless and
//! only the lookup fields carry indexes.

use crate::{Database, DbError};

/// Initialize the database schema.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.client()
        .query(QUEUE_SCHEMA)
        .query(JOB_SCHEMA)
        .query(JOB_HISTORY_SCHEMA)
        .query(BATCH_SCHEMA)
        .query(STAGE_RETRY_SCHEMA)
        .await?
        .check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue table: one record per named stage queue, keyed by name.
const QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue SCHEMALESS;
DEFINE INDEX IF NOT EXISTS queue_name ON queue FIELDS name UNIQUE;
DEFINE INDEX IF NOT EXISTS queue_state ON queue FIELDS state;
"#;

/// Job table: live jobs, keyed by job id.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;
DEFINE INDEX IF NOT EXISTS job_queue ON job FIELDS queue;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_batch ON job FIELDS batch_id;
DEFINE INDEX IF NOT EXISTS job_queue_state ON job FIELDS queue, state;
"#;

/// Job history table for archived terminal jobs.
const JOB_HISTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_history SCHEMALESS;
DEFINE INDEX IF NOT EXISTS history_queue ON job_history FIELDS queue;
DEFINE INDEX IF NOT EXISTS history_status ON job_history FIELDS final_status;
DEFINE INDEX IF NOT EXISTS history_batch ON job_history FIELDS batch_id;
"#;

/// Batch table, keyed by batch id.
const BATCH_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS batch SCHEMALESS;
DEFINE INDEX IF NOT EXISTS batch_status ON batch FIELDS status;
DEFINE INDEX IF NOT EXISTS batch_profile ON batch FIELDS job_profile_id;
"#;

/// Manual stage retry counters, keyed by candidate and stage.
const STAGE_RETRY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS stage_retry SCHEMALESS;
DEFINE INDEX IF NOT EXISTS stage_retry_candidate ON stage_retry FIELDS candidate_id;
"#;
