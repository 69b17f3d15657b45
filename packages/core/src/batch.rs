//! Batches of candidates and their derived progress.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::Stage;

/// Unique identifier for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Ulid);

impl BatchId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

/// A set of candidates submitted together against one job profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub job_profile_id: String,
    pub candidate_ids: Vec<String>,
    pub total_candidates: u32,
    pub processed_candidates: u32,
    pub failed_candidates: u32,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(job_profile_id: impl Into<String>, candidate_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: BatchId::new(),
            job_profile_id: job_profile_id.into(),
            total_candidates: candidate_ids.len() as u32,
            candidate_ids,
            processed_candidates: 0,
            failed_candidates: 0,
            status: BatchStatus::Processing,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record observed progress. Counts never decrease and their sum never
    /// exceeds `total_candidates`.
    pub fn record_progress(&mut self, processed: u32, failed: u32) {
        let processed = processed
            .max(self.processed_candidates)
            .min(self.total_candidates);
        let failed = failed
            .max(self.failed_candidates)
            .min(self.total_candidates - processed);
        self.processed_candidates = processed;
        self.failed_candidates = failed;

        if self.status == BatchStatus::Processing && self.is_settled() {
            self.status = if processed == 0 && failed > 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
        }
        self.updated_at = Utc::now();
    }

    /// Every candidate reached a terminal outcome.
    pub fn is_settled(&self) -> bool {
        self.processed_candidates + self.failed_candidates >= self.total_candidates
    }

    pub fn mark_failed(&mut self) {
        self.status = BatchStatus::Failed;
        self.updated_at = Utc::now();
    }
}

/// Per-stage tallies, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub progress_percent: f64,
}

impl StageProgress {
    pub fn record(&mut self, completed: bool, failed: bool) {
        self.total += 1;
        if completed {
            self.completed += 1;
        }
        if failed {
            self.failed += 1;
        }
        self.progress_percent = percent(self.completed + self.failed, self.total);
    }
}

/// Aggregated progress of one batch across all stage queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub total_jobs: u32,
    pub completed_jobs: u32,
    pub failed_jobs: u32,
    /// `(completed + failed) / total * 100`.
    pub progress: f64,
    pub stages: BTreeMap<Stage, StageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Batch>,
}

pub(crate) fn percent(done: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(done) / f64::from(total) * 100.0
    }
}

impl BatchProgress {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            progress: 0.0,
            stages: BTreeMap::new(),
            batch: None,
        }
    }

    /// Fold one job's outcome into the tallies.
    pub fn record(&mut self, stage: Stage, completed: bool, failed: bool) {
        self.stages.entry(stage).or_default().record(completed, failed);
        self.total_jobs += 1;
        if completed {
            self.completed_jobs += 1;
        }
        if failed {
            self.failed_jobs += 1;
        }
        self.progress = percent(self.completed_jobs + self.failed_jobs, self.total_jobs);
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageProgress> {
        self.stages.get(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_exceeds_total() {
        let mut batch = Batch::new("jp1", vec!["a".into(), "b".into(), "c".into()]);
        batch.record_progress(2, 5);
        assert_eq!(batch.processed_candidates, 2);
        assert_eq!(batch.failed_candidates, 1);
        assert_eq!(batch.status, BatchStatus::Completed);

        batch.record_progress(0, 0);
        assert_eq!(batch.processed_candidates + batch.failed_candidates, 3);
    }

    #[test]
    fn all_failed_batch_is_failed() {
        let mut batch = Batch::new("jp1", vec!["a".into()]);
        batch.record_progress(0, 1);
        assert_eq!(batch.status, BatchStatus::Failed);
    }
}
