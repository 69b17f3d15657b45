//! Job domain types for work items in a stage queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{BatchId, Stage, StagePayload};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Higher values are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(25);
    /// Used for manual stage retries so they jump ahead of scheduled work.
    pub const URGENT: Priority = Priority(100);
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse job state used for counting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
            JobState::Paused => "paused",
        }
    }

    /// Not yet picked up by a worker.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed | JobState::Paused)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Ready to be picked up.
    #[default]
    Waiting,
    /// Not ready before `until` (initial delay or retry backoff).
    Delayed { until: DateTime<Utc> },
    /// Held by a worker.
    Active {
        started_at: DateTime<Utc>,
        worker_id: String,
    },
    /// Handler returned a result.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: JobResult,
    },
    /// Attempts exhausted.
    Failed {
        failed_at: DateTime<Utc>,
        reason: String,
    },
    /// Waiting, but the queue is paused.
    Paused,
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Waiting => JobState::Waiting,
            JobStatus::Delayed { .. } => JobState::Delayed,
            JobStatus::Active { .. } => JobState::Active,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
            JobStatus::Paused => JobState::Paused,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    /// When the job reached its terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Completed { completed_at, .. } => Some(*completed_at),
            JobStatus::Failed { failed_at, .. } => Some(*failed_at),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// Options accepted by `enqueue`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub delay: Duration,
    /// Overrides the queue's default attempt budget.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A job is one stage of work for one candidate, owned by exactly one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Stage-tagged payload.
    pub payload: StagePayload,
    /// Execution priority.
    pub priority: Priority,
    /// Current status.
    pub status: JobStatus,
    /// Initial delay requested at enqueue time.
    #[serde(default)]
    pub delay_ms: u64,
    /// Number of handler invocations so far.
    #[serde(default)]
    pub attempts_made: u32,
    /// Total handler invocations allowed before the job fails.
    pub max_attempts: u32,
    /// Times the job was recovered from a dead or silent worker.
    #[serde(default)]
    pub stalled_count: u32,
    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job for `queue`, delayed if `options.delay` is non-zero.
    pub fn new(queue: impl Into<String>, payload: StagePayload, options: &EnqueueOptions) -> Self {
        let now = Utc::now();
        let status = if options.delay.is_zero() {
            JobStatus::Waiting
        } else {
            JobStatus::Delayed {
                until: now
                    + chrono::Duration::from_std(options.delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
            }
        };

        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            priority: options.priority,
            status,
            delay_ms: options.delay.as_millis() as u64,
            attempts_made: 0,
            max_attempts: options.max_attempts.unwrap_or(3),
            stalled_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }

    pub fn candidate_id(&self) -> &str {
        &self.payload.candidate().candidate_id
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.payload.batch_id()
    }

    /// Whether another attempt is allowed after the current one failed.
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Delayed job whose delay has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Delayed { until } => until <= now,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    use super::*;

    #[test]
    fn test_delayed_heap_pops_earliest_due_time() {
        let now = Utc::now();
        let later = JobId::new();
        let sooner = JobId::new();

        let mut delayed = BinaryHeap::new();
        delayed.push(Reverse((now + chrono::Duration::seconds(10), later)));
        delayed.push(Reverse((now, sooner)));

        let Reverse((_, first)) = delayed.pop().unwrap();
        assert_eq!(first, sooner);
    }

    #[test]
    fn test_job_ids_order_like_their_ulids() {
        let a = JobId(Ulid::from_parts(1, 0));
        let b = JobId(Ulid::from_parts(2, 0));
        assert!(a < b);
    }
}
