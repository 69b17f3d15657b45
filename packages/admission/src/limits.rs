use serde::{Deserialize, Serialize};

use crate::AdmissionConfig;

/// Runtime limits every producer reads before admitting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLimits {
    pub max_concurrent_jobs: usize,
    pub max_batch_size: usize,
    pub max_file_size: u64,
    pub max_memory_per_job: u64,
}

impl ProcessingLimits {
    /// Size the limits from the host's total memory.
    pub fn from_total_memory(total_bytes: u64, config: &AdmissionConfig) -> Self {
        let total = total_bytes as f64;
        let jobs = (0.6 * total / config.per_job_budget as f64).floor() as usize;
        let batch = (0.4 * total / config.per_item_budget as f64).floor() as usize;
        Self {
            max_concurrent_jobs: jobs.max(1),
            max_batch_size: batch.max(10),
            max_file_size: config.max_file_size,
            max_memory_per_job: config.max_memory_per_job,
        }
    }

    /// Limits reduced by `percent` percent, rounded down.
    pub fn shrunk(&self, percent: usize) -> Self {
        let keep = 100 - percent.min(100);
        Self {
            max_concurrent_jobs: (self.max_concurrent_jobs * keep / 100).max(1),
            max_batch_size: (self.max_batch_size * keep / 100).max(1),
            ..*self
        }
    }

    /// One job at a time, half the batch size.
    pub fn emergency(&self) -> Self {
        Self {
            max_concurrent_jobs: 1,
            max_batch_size: (self.max_batch_size / 2).max(1),
            ..*self
        }
    }
}
