//! SurrealDB integration for the candidate pipeline.
//!
//! This crate provides the backing store for the stage queues: jobs,
//! queue records, batches and per-candidate stage retry counters.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError};
pub use schema::init_schema;

/// Connect and make sure the schema exists.
///
/// Called once at start-up; the returned handle is cloned into every
/// component that needs storage.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = Database::connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
