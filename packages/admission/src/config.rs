use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Thresholds and budgets for the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// How often memory is sampled.
    pub sample_interval: Duration,
    /// Samples kept in the history ring.
    pub history_size: usize,
    /// Percentages at which usage enters each tier.
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub emergency_threshold: f64,
    /// Memory assumed per concurrent job when sizing the job limit.
    pub per_job_budget: u64,
    /// Memory assumed per batch item when sizing the batch limit.
    pub per_item_budget: u64,
    pub max_file_size: u64,
    pub max_memory_per_job: u64,
    /// Upper bound for each cleanup callback.
    pub cleanup_timeout: Duration,
    /// Samples compared by the trend and the band they must move by.
    pub trend_window: usize,
    pub trend_band: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            history_size: 100,
            warning_threshold: 70.0,
            critical_threshold: 85.0,
            emergency_threshold: 90.0,
            per_job_budget: 512 * MIB,
            per_item_budget: 50 * MIB,
            max_file_size: 10 * MIB,
            max_memory_per_job: 512 * MIB,
            cleanup_timeout: Duration::from_secs(5),
            trend_window: 5,
            trend_band: 5.0,
        }
    }
}

impl AdmissionConfig {
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size.max(1);
        self
    }

    pub fn with_thresholds(mut self, warning: f64, critical: f64, emergency: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self.emergency_threshold = emergency;
        self
    }

    pub fn with_budgets(mut self, per_job: u64, per_item: u64) -> Self {
        self.per_job_budget = per_job.max(1);
        self.per_item_budget = per_item.max(1);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }
}
