//! Memory snapshots and where they come from.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};

/// One memory sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
    /// System memory in use, 0 to 100.
    pub percentage: f64,
    /// Resident memory of this process.
    pub heap_used: u64,
    /// Virtual memory of this process.
    pub heap_total: u64,
    pub timestamp: DateTime<Utc>,
}

impl MemoryStats {
    pub fn new(used_bytes: u64, total_bytes: u64, heap_used: u64, heap_total: u64) -> Self {
        let percentage = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        Self {
            used_bytes,
            total_bytes,
            percentage,
            heap_used,
            heap_total,
            timestamp: Utc::now(),
        }
    }
}

/// Usage band a sample falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// Direction of recent memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Source of memory samples.
pub trait MemorySampler: Send + Sync + 'static {
    fn sample(&self) -> MemoryStats;
}

/// Samples the host and the current process through sysinfo.
pub struct SystemMemorySampler {
    system: Mutex<System>,
}

impl SystemMemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemMemorySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemorySampler").finish()
    }
}

impl MemorySampler for SystemMemorySampler {
    fn sample(&self) -> MemoryStats {
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_memory();

        let mut heap_used = 0;
        let mut heap_total = 0;
        if let Ok(pid) = sysinfo::get_current_pid() {
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = sys.process(pid) {
                heap_used = process.memory();
                heap_total = process.virtual_memory();
            }
        }

        MemoryStats::new(sys.used_memory(), sys.total_memory(), heap_used, heap_total)
    }
}

/// Sampler whose usage is set by hand. Used to simulate memory pressure.
#[derive(Debug)]
pub struct ManualSampler {
    total_bytes: u64,
    used_bytes: AtomicU64,
}

impl ManualSampler {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes: AtomicU64::new(0),
        }
    }

    /// Report `percentage` of total memory as used from now on.
    pub fn set_percentage(&self, percentage: f64) {
        let used = (self.total_bytes as f64 * percentage.clamp(0.0, 100.0) / 100.0) as u64;
        self.used_bytes.store(used, Ordering::SeqCst);
    }

    pub fn set_used(&self, bytes: u64) {
        self.used_bytes.store(bytes.min(self.total_bytes), Ordering::SeqCst);
    }
}

impl MemorySampler for ManualSampler {
    fn sample(&self) -> MemoryStats {
        let used = self.used_bytes.load(Ordering::SeqCst);
        MemoryStats::new(used, self.total_bytes, used, used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_sampler_percentage() {
        let sampler = ManualSampler::new(1000);
        sampler.set_percentage(92.0);
        let stats = sampler.sample();
        assert_eq!(stats.used_bytes, 920);
        assert!((stats.percentage - 92.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_total_reports_zero_percent() {
        let stats = MemoryStats::new(10, 0, 0, 0);
        assert_eq!(stats.percentage, 0.0);
    }
}
