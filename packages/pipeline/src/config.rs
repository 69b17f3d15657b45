//! Process configuration, with environment overrides.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use admission::AdmissionConfig;
use db::DbConfig;
use monitor::AlertConfig;
use pipeline_core::{QueueConfig, Stage};

use crate::PipelineError;

/// Where and how log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
        }
    }
}

/// Everything `Pipeline::start` needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db: DbConfig,
    /// Base settings for every stage queue. Concurrency is set per stage.
    pub queue: QueueConfig,
    pub stage_concurrency: BTreeMap<Stage, u32>,
    pub admission: AdmissionConfig,
    pub alerts: AlertConfig,
    /// Manual retries allowed per candidate and stage.
    pub max_stage_retries: u32,
    /// How long failure patterns are kept after their last occurrence.
    pub failure_retention: Duration,
    pub prune_interval: Duration,
    /// Age of finished jobs archived by the memory cleanup callback.
    pub cleanup_grace: Duration,
    /// Delay between a main-thread panic's cleanup and process exit.
    pub panic_grace: Duration,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let stage_concurrency = BTreeMap::from([
            (Stage::Resume, 4),
            (Stage::AiAnalysis, 3),
            (Stage::LinkedIn, 2),
            (Stage::GitHub, 2),
            (Stage::Interview, 1),
            (Stage::Scoring, 4),
        ]);

        Self {
            db: DbConfig::memory(),
            queue: QueueConfig::default(),
            stage_concurrency,
            admission: AdmissionConfig::default(),
            alerts: AlertConfig::default(),
            max_stage_retries: 2,
            failure_retention: Duration::from_secs(60 * 60),
            prune_interval: Duration::from_secs(5 * 60),
            cleanup_grace: Duration::from_secs(10 * 60),
            panic_grace: Duration::from_secs(1),
            log: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by `PIPELINE_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if lookup("RAILWAY_ENVIRONMENT").is_some() {
            config.db = DbConfig::file("./data/surrealdb");
        }
        if let Some(endpoint) = lookup("PIPELINE_DB_ENDPOINT") {
            config.db = config.db.with_endpoint(endpoint);
        }
        if let Some(namespace) = lookup("PIPELINE_DB_NAMESPACE") {
            config.db = config.db.with_namespace(namespace);
        }
        if let Some(database) = lookup("PIPELINE_DB_DATABASE") {
            config.db = config.db.with_database(database);
        }
        if let Some(url) = lookup("PIPELINE_ALERT_WEBHOOK_URL") {
            config.alerts = config.alerts.with_webhook_url(url);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "PIPELINE_SAMPLE_INTERVAL_SECS")? {
            config.admission = config
                .admission
                .with_sample_interval(Duration::from_secs(secs.max(1)));
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "PIPELINE_ALERT_INTERVAL_SECS")? {
            config.alerts = config.alerts.with_interval(Duration::from_secs(secs.max(1)));
        }
        if let Some(max) = parse::<u32, _>(&lookup, "PIPELINE_MAX_STAGE_RETRIES")? {
            config.max_stage_retries = max;
        }
        if let Some(json) = parse::<bool, _>(&lookup, "PIPELINE_LOG_JSON")? {
            config.log.json = json;
        }

        Ok(config)
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_stage_concurrency(mut self, stage: Stage, concurrency: u32) -> Self {
        self.stage_concurrency.insert(stage, concurrency.max(1));
        self
    }

    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertConfig) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_max_stage_retries(mut self, max: u32) -> Self {
        self.max_stage_retries = max;
        self
    }

    /// Workers attached to `stage`'s queue.
    pub fn concurrency(&self, stage: Stage) -> u32 {
        self.stage_concurrency.get(&stage).copied().unwrap_or(1)
    }

    /// Queue settings for `stage`.
    pub fn queue_config(&self, stage: Stage) -> QueueConfig {
        self.queue.clone().with_concurrency(self.concurrency(stage))
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| PipelineError::Config(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}
