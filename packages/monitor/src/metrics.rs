//! Named metrics read by the alert engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pipeline_core::ErrorKind;
use serde::{Deserialize, Serialize};

pub const MEMORY_PERCENTAGE: &str = "memory.percentage";
pub const ACTIVE_JOBS: &str = "admission.active_jobs";
pub const API_CALLS: &str = "api.calls";
pub const API_ERRORS: &str = "api.errors";
/// Errors as a percentage of calls.
pub const API_ERROR_RATE: &str = "api.error_rate";
pub const API_RATE_LIMITED: &str = "api.rate_limited";
pub const API_TIMEOUTS: &str = "api.timeouts";
pub const QUEUE_BACKLOG: &str = "queue.backlog";
pub const QUEUE_ACTIVE: &str = "queue.active";
pub const QUEUE_FAILED: &str = "queue.failed";
pub const QUEUE_COMPLETED: &str = "queue.completed";
pub const FAILURE_PATTERNS: &str = "failures.patterns";
pub const FAILURES_TOTAL: &str = "failures.total";

pub type MetricSnapshot = HashMap<String, f64>;

pub type MetricsFuture<'a> = Pin<Box<dyn Future<Output = MetricSnapshot> + Send + 'a>>;

/// Something that can report current metric values.
pub trait MetricSource: Send + Sync + 'static {
    fn collect(&self) -> MetricsFuture<'_>;
}

/// Merges the snapshots of several sources. Later sources win on clashes.
#[derive(Default, Clone)]
pub struct CompositeMetrics {
    sources: Vec<Arc<dyn MetricSource>>,
}

impl CompositeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl MetricSource for CompositeMetrics {
    fn collect(&self) -> MetricsFuture<'_> {
        Box::pin(async move {
            let mut merged = MetricSnapshot::new();
            for source in &self.sources {
                merged.extend(source.collect().await);
            }
            merged
        })
    }
}

/// Values set by hand.
#[derive(Debug, Default)]
pub struct GaugeSet {
    values: Mutex<MetricSnapshot>,
}

impl GaugeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: f64) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

impl MetricSource for GaugeSet {
    fn collect(&self) -> MetricsFuture<'_> {
        let values = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { values })
    }
}

/// Running totals of external API calls.
#[derive(Debug, Default)]
pub struct ApiCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    rate_limited: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApiSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
}

impl ApiSnapshot {
    /// Errors as a percentage of calls, 0 when there were none.
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64 * 100.0
        }
    }
}

impl ApiCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        match kind {
            ErrorKind::RateLimit => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> ApiSnapshot {
        ApiSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl MetricSource for ApiCounters {
    fn collect(&self) -> MetricsFuture<'_> {
        let snapshot = self.snapshot();
        Box::pin(async move {
            MetricSnapshot::from([
                (API_CALLS.to_string(), snapshot.calls as f64),
                (API_ERRORS.to_string(), snapshot.errors as f64),
                (API_ERROR_RATE.to_string(), snapshot.error_rate()),
                (API_RATE_LIMITED.to_string(), snapshot.rate_limited as f64),
                (API_TIMEOUTS.to_string(), snapshot.timeouts as f64),
            ])
        })
    }
}
