//! Queue domain types for named stage queues.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current operational state of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Queue is active and dispatching jobs.
    #[default]
    Running,
    /// Queue is paused; jobs are kept but not dispatched.
    Paused,
    /// Queue is shutting down.
    Stopped,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Running => write!(f, "running"),
            QueueState::Paused => write!(f, "paused"),
            QueueState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Exponential retry backoff: `base * 2^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            max_ms: 10 * 60 * 1_000,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers attached by `consume`.
    pub concurrency: u32,
    /// Default attempt budget for jobs in this queue.
    pub default_max_attempts: u32,
    /// Retry backoff.
    pub backoff: BackoffPolicy,
    /// How often workers poll for work and renew their job lease.
    pub poll_interval_ms: u64,
    /// Housekeeping tick for stall detection and retention.
    pub tick_interval_ms: u64,
    /// A job whose lease is older than this is considered stalled.
    pub stalled_timeout_ms: u64,
    /// Stalls tolerated before the job is failed.
    pub max_stalled_count: u32,
    /// Terminal jobs older than this are archived on the tick.
    pub retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            default_max_attempts: 3,
            backoff: BackoffPolicy::default(),
            poll_interval_ms: 100,
            tick_interval_ms: 1_000,
            stalled_timeout_ms: 30_000,
            max_stalled_count: 1,
            retention_secs: 24 * 60 * 60,
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_stalled_timeout(mut self, timeout: Duration) -> Self {
        self.stalled_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn stalled_timeout(&self) -> Duration {
        Duration::from_millis(self.stalled_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: u64,
}

impl QueueStats {
    /// Jobs not yet picked up.
    pub fn backlog(&self) -> u64 {
        self.waiting + self.delayed + self.paused
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn total(&self) -> u64 {
        self.backlog() + self.active + self.processed()
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }

    pub fn merge(&mut self, other: &QueueStats) {
        self.waiting += other.waiting;
        self.active += other.active;
        self.completed += other.completed;
        self.failed += other.failed;
        self.delayed += other.delayed;
        self.paused += other.paused;
    }
}

/// A named, durable work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    /// Unique queue name.
    pub name: String,
    /// Current operational state.
    pub state: QueueState,
    /// Queue configuration.
    pub config: QueueConfig,
    /// When the queue was created.
    pub created_at: DateTime<Utc>,
    /// When the queue was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    /// Create a new queue with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            state: QueueState::Running,
            config: QueueConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the configuration for this queue.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Check if the queue is accepting new jobs.
    pub fn is_accepting_jobs(&self) -> bool {
        !matches!(self.state, QueueState::Stopped)
    }

    /// Check if the queue dispatches jobs to workers.
    pub fn is_dispatching(&self) -> bool {
        matches!(self.state, QueueState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            max_ms: 5_000,
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }
}
