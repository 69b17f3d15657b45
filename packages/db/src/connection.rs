//! Database connection handle.

use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

use crate::repositories::{BatchRepository, JobRepository, QueueRepository, StageRetryRepository};

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "file://path", "rocksdb://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "pipeline".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Cloneable handle to one SurrealDB connection.
#[derive(Clone)]
pub struct Database {
    client: Surreal<Any>,
    /// Serializes read-modify-write updates of counter records.
    counters: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open a connection. Every `mem://` connection is a separate store.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        tracing::info!(endpoint = %config.endpoint, "Connecting to database");

        let client = connect(config.endpoint.as_str()).await?;

        if let Some((username, password)) = &config.credentials {
            client.signin(Root { username, password }).await?;
        }

        client
            .use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        tracing::info!(
            namespace = %config.namespace,
            database = %config.database,
            "Connected to database"
        );

        Ok(Self {
            client,
            counters: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Raw client for ad hoc queries.
    pub fn client(&self) -> &Surreal<Any> {
        &self.client
    }

    pub(crate) fn counter_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.counters
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> Result<(), DbError> {
        self.client.health().await?;
        Ok(())
    }

    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.clone())
    }

    pub fn queues(&self) -> QueueRepository {
        QueueRepository::new(self.clone())
    }

    pub fn batches(&self) -> BatchRepository {
        BatchRepository::new(self.clone())
    }

    pub fn stage_retries(&self) -> StageRetryRepository {
        StageRetryRepository::new(self.clone())
    }
}
