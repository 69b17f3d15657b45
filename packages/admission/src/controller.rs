//! Memory-aware admission control.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use pipeline_core::AdmissionGate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup::{self, CleanupCallback, CleanupFuture, CleanupOutcome};
use crate::{
    AdmissionConfig, AdmissionError, MemorySampler, MemoryStats, MemoryTier, MemoryTrend,
    ProcessingLimits, SystemMemorySampler,
};

/// Memory state changes, one per sample and tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "stats", rename_all = "snake_case")]
pub enum MemoryEvent {
    /// Every sample.
    Stats(MemoryStats),
    /// Usage in the warning tier.
    Warning(MemoryStats),
    /// Usage in the critical tier.
    High(MemoryStats),
    /// Usage in the emergency tier.
    Critical(MemoryStats),
}

/// Snapshot for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryReport {
    pub current: Option<MemoryStats>,
    pub tier: MemoryTier,
    pub trend: MemoryTrend,
    pub limits: ProcessingLimits,
    pub baseline: ProcessingLimits,
    pub active_jobs: usize,
    pub samples: usize,
    pub cleanup_callbacks: usize,
}

struct ActiveJob {
    started: Instant,
    heap_at_start: u64,
}

struct Inner {
    config: AdmissionConfig,
    sampler: Arc<dyn MemorySampler>,
    baseline: ProcessingLimits,
    /// Written only by `sample_now`.
    limits: RwLock<ProcessingLimits>,
    history: Mutex<VecDeque<MemoryStats>>,
    tier: Mutex<MemoryTier>,
    active: Mutex<HashMap<String, ActiveJob>>,
    cleanups: Mutex<Vec<CleanupCallback>>,
    events: broadcast::Sender<MemoryEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decides whether new work may start, from memory usage and the number
/// of running jobs. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limits", &self.limits())
            .field("tier", &self.tier())
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}

impl AdmissionController {
    /// Build a controller; limits are sized from the first sample's total.
    pub fn new(config: AdmissionConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        let first = sampler.sample();
        let baseline = ProcessingLimits::from_total_memory(first.total_bytes, &config);
        let (events, _) = broadcast::channel(256);

        tracing::info!(
            total_mb = first.total_bytes / 1024 / 1024,
            max_concurrent_jobs = baseline.max_concurrent_jobs,
            max_batch_size = baseline.max_batch_size,
            "Admission controller initialised"
        );

        let mut history = VecDeque::with_capacity(config.history_size);
        history.push_back(first);

        Self {
            inner: Arc::new(Inner {
                config,
                sampler,
                baseline,
                limits: RwLock::new(baseline),
                history: Mutex::new(history),
                tier: Mutex::new(MemoryTier::Normal),
                active: Mutex::new(HashMap::new()),
                cleanups: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Controller sampling the host through sysinfo.
    pub fn system(config: AdmissionConfig) -> Self {
        Self::new(config, Arc::new(SystemMemorySampler::new()))
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.inner.events.subscribe()
    }

    pub fn limits(&self) -> ProcessingLimits {
        *self
            .inner
            .limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn baseline_limits(&self) -> ProcessingLimits {
        self.inner.baseline
    }

    pub fn tier(&self) -> MemoryTier {
        *lock(&self.inner.tier)
    }

    /// Latest sample.
    pub fn current(&self) -> Option<MemoryStats> {
        lock(&self.inner.history).back().cloned()
    }

    pub fn history(&self) -> Vec<MemoryStats> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    pub fn active_jobs(&self) -> usize {
        lock(&self.inner.active).len()
    }

    fn current_percentage(&self) -> f64 {
        self.current().map(|s| s.percentage).unwrap_or(0.0)
    }

    /// Tier for a usage percentage.
    pub fn classify(&self, percentage: f64) -> MemoryTier {
        let config = &self.inner.config;
        if percentage >= config.emergency_threshold {
            MemoryTier::Emergency
        } else if percentage >= config.critical_threshold {
            MemoryTier::Critical
        } else if percentage >= config.warning_threshold {
            MemoryTier::Warning
        } else {
            MemoryTier::Normal
        }
    }

    fn admits(&self, running: usize) -> bool {
        self.current_percentage() < self.inner.config.critical_threshold
            && running < self.limits().max_concurrent_jobs
    }

    /// Memory is below the critical tier and there is a free job slot.
    pub fn can_admit_job(&self) -> bool {
        self.admits(self.active_jobs())
    }

    /// Record a job as running, without checking limits.
    pub fn register_job(&self, job_id: &str) {
        let heap_at_start = self.current().map(|s| s.heap_used).unwrap_or(0);
        lock(&self.inner.active).insert(
            job_id.to_string(),
            ActiveJob {
                started: Instant::now(),
                heap_at_start,
            },
        );
    }

    /// Register `job_id` only if it is admitted.
    pub fn try_register_job(&self, job_id: &str) -> bool {
        let heap_at_start = self.current().map(|s| s.heap_used).unwrap_or(0);
        let mut active = lock(&self.inner.active);
        if !self.admits(active.len()) {
            return false;
        }
        active.insert(
            job_id.to_string(),
            ActiveJob {
                started: Instant::now(),
                heap_at_start,
            },
        );
        true
    }

    /// Forget a running job. Returns how long it ran.
    pub fn unregister_job(&self, job_id: &str) -> Option<Duration> {
        let job = lock(&self.inner.active).remove(job_id)?;
        let elapsed = job.started.elapsed();
        let heap_now = self.current().map(|s| s.heap_used).unwrap_or(0);
        tracing::debug!(
            job_id = %job_id,
            elapsed_ms = elapsed.as_millis() as u64,
            heap_delta = heap_now as i64 - job.heap_at_start as i64,
            "Job released"
        );
        Some(elapsed)
    }

    pub fn is_file_size_allowed(&self, bytes: u64) -> bool {
        bytes <= self.limits().max_file_size
    }

    pub fn is_batch_size_allowed(&self, count: usize) -> bool {
        count <= self.limits().max_batch_size
    }

    /// Refuse new work while memory is at or above the critical tier.
    pub fn check_memory(&self) -> Result<(), AdmissionError> {
        let percentage = self.current_percentage();
        if percentage >= self.inner.config.critical_threshold {
            return Err(AdmissionError::MemoryCritical { percentage });
        }
        Ok(())
    }

    /// Fail fast on a batch the current limits or memory refuse.
    pub fn check_batch(&self, count: usize) -> Result<(), AdmissionError> {
        self.check_memory()?;
        let limit = self.limits().max_batch_size;
        if count > limit {
            return Err(AdmissionError::BatchTooLarge {
                requested: count,
                limit,
            });
        }
        Ok(())
    }

    pub fn check_file(&self, size: u64) -> Result<(), AdmissionError> {
        let limit = self.limits().max_file_size;
        if size > limit {
            return Err(AdmissionError::FileTooLarge { size, limit });
        }
        Ok(())
    }

    /// Compare the first and last of the recent samples.
    pub fn trend(&self) -> MemoryTrend {
        let history = lock(&self.inner.history);
        let window = self.inner.config.trend_window.max(2);
        let recent: Vec<&MemoryStats> = history.iter().rev().take(window).collect();
        if recent.len() < 2 {
            return MemoryTrend::Stable;
        }
        let (Some(newest), Some(oldest)) = (recent.first(), recent.last()) else {
            return MemoryTrend::Stable;
        };

        let change = newest.percentage - oldest.percentage;
        if change > self.inner.config.trend_band {
            MemoryTrend::Increasing
        } else if change < -self.inner.config.trend_band {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }

    /// Add a callback run at the emergency tier and on shutdown.
    pub fn register_cleanup<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> CleanupFuture + Send + Sync + 'static,
    {
        let callback = CleanupCallback::new(name, callback);
        tracing::debug!(callback = %callback.name, "Registered cleanup callback");
        lock(&self.inner.cleanups).push(callback);
    }

    /// Run every cleanup callback and collect what happened.
    pub async fn run_cleanup(&self) -> Vec<CleanupOutcome> {
        let callbacks = lock(&self.inner.cleanups).clone();
        if callbacks.is_empty() {
            return Vec::new();
        }
        let outcomes = cleanup::run_all(callbacks, self.inner.config.cleanup_timeout).await;
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        tracing::info!(
            callbacks = outcomes.len(),
            failed,
            "Cleanup callbacks finished"
        );
        outcomes
    }

    /// Reclaim memory now. There is no collector to trigger, so this
    /// runs the cleanup callbacks.
    pub async fn force_reclaim(&self) -> Vec<CleanupOutcome> {
        tracing::warn!("Forcing memory reclaim");
        self.run_cleanup().await
    }

    /// Take a sample, record it and react to its tier.
    pub async fn sample_now(&self) -> MemoryStats {
        let stats = self.inner.sampler.sample();
        {
            let mut history = lock(&self.inner.history);
            history.push_back(stats.clone());
            while history.len() > self.inner.config.history_size {
                history.pop_front();
            }
        }
        let _ = self.inner.events.send(MemoryEvent::Stats(stats.clone()));

        let tier = self.classify(stats.percentage);
        let previous = std::mem::replace(&mut *lock(&self.inner.tier), tier);
        if tier != previous {
            tracing::info!(
                from = previous.as_str(),
                to = tier.as_str(),
                percentage = stats.percentage,
                "Memory tier changed"
            );
        }

        match tier {
            MemoryTier::Normal => {
                if self.limits() != self.inner.baseline {
                    tracing::info!("Memory recovered, restoring processing limits");
                    self.set_limits(self.inner.baseline);
                }
            }
            MemoryTier::Warning => {
                tracing::warn!(percentage = stats.percentage, "Memory usage high");
                let _ = self.inner.events.send(MemoryEvent::Warning(stats.clone()));
            }
            MemoryTier::Critical => {
                tracing::warn!(
                    percentage = stats.percentage,
                    "Memory usage critical, reducing processing limits"
                );
                let _ = self.inner.events.send(MemoryEvent::High(stats.clone()));
                tracing::debug!("Memory reclaim requested");
                self.set_limits(self.inner.baseline.shrunk(30));
            }
            MemoryTier::Emergency => {
                tracing::error!(
                    percentage = stats.percentage,
                    "Memory emergency, running cleanup and clamping limits"
                );
                let _ = self.inner.events.send(MemoryEvent::Critical(stats.clone()));
                self.set_limits(self.inner.baseline.emergency());
                self.force_reclaim().await;
            }
        }

        stats
    }

    fn set_limits(&self, limits: ProcessingLimits) {
        *self
            .inner
            .limits
            .write()
            .unwrap_or_else(PoisonError::into_inner) = limits;
        tracing::info!(
            max_concurrent_jobs = limits.max_concurrent_jobs,
            max_batch_size = limits.max_batch_size,
            "Processing limits updated"
        );
    }

    /// Sample every `sample_interval` until `token` is cancelled.
    pub fn start(&self, token: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let interval = self.inner.config.sample_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Memory sampling stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        controller.sample_now().await;
                    }
                }
            }
        })
    }

    pub fn memory_report(&self) -> MemoryReport {
        MemoryReport {
            current: self.current(),
            tier: self.tier(),
            trend: self.trend(),
            limits: self.limits(),
            baseline: self.inner.baseline,
            active_jobs: self.active_jobs(),
            samples: lock(&self.inner.history).len(),
            cleanup_callbacks: lock(&self.inner.cleanups).len(),
        }
    }
}

impl AdmissionGate for AdmissionController {
    fn can_admit(&self) -> bool {
        self.can_admit_job()
    }

    fn try_admit(&self, job_id: &str) -> bool {
        self.try_register_job(job_id)
    }

    fn release(&self, job_id: &str) {
        self.unregister_job(job_id);
    }
}
