//! Failure pattern recorder.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pipeline_core::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::MonitorError;
use crate::metrics::{FAILURE_PATTERNS, FAILURES_TOTAL, MetricSnapshot, MetricSource, MetricsFuture};
use crate::recovery::{
    RecoveryAction, RecoveryAttempt, RecoveryContext, RecoveryPolicy, RecoveryStrategy,
};

const RECOVERY_HISTORY: usize = 100;

/// Identity of a failure pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternKey {
    pub service: String,
    pub operation: String,
    pub error_kind: ErrorKind,
}

impl PatternKey {
    pub fn new(service: impl Into<String>, operation: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            error_kind,
        }
    }
}

impl std::fmt::Display for PatternKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.operation, self.error_kind)
    }
}

/// Aggregated failures sharing a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub key: PatternKey,
    pub count: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub last_error: String,
    pub recovery_action: Option<RecoveryAction>,
    /// Times recovery was triggered from this pattern.
    pub recoveries: u32,
    /// Occurrences inside the policy window since the last recovery.
    #[serde(skip)]
    recent: VecDeque<DateTime<Utc>>,
}

/// Read-only view for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub patterns: usize,
    pub total_failures: u64,
    pub strategies: Vec<RecoveryAction>,
    pub recent_attempts: Vec<RecoveryAttempt>,
}

struct Inner {
    patterns: Mutex<HashMap<PatternKey, FailurePattern>>,
    policies: RwLock<HashMap<String, RecoveryPolicy>>,
    strategies: RwLock<HashMap<RecoveryAction, Arc<dyn RecoveryStrategy>>>,
    attempts: Mutex<VecDeque<RecoveryAttempt>>,
    retention: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts failures by (service, operation, kind) and runs recovery when a
/// service keeps failing.
#[derive(Clone)]
pub struct FailurePatternRecorder {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FailurePatternRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailurePatternRecorder")
            .field("patterns", &lock(&self.inner.patterns).len())
            .field("retention", &self.inner.retention)
            .finish()
    }
}

impl Default for FailurePatternRecorder {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl FailurePatternRecorder {
    /// Patterns idle for longer than `retention` are pruned.
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                patterns: Mutex::new(HashMap::new()),
                policies: RwLock::new(HashMap::new()),
                strategies: RwLock::new(HashMap::new()),
                attempts: Mutex::new(VecDeque::new()),
                retention,
            }),
        }
    }

    /// Override the policy for `service`.
    pub fn set_policy(&self, service: impl Into<String>, policy: RecoveryPolicy) {
        self.inner
            .policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.into(), policy);
    }

    pub fn policy_for(&self, service: &str) -> RecoveryPolicy {
        self.inner
            .policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .copied()
            .unwrap_or_else(|| RecoveryPolicy::for_service(service))
    }

    pub fn register_strategy(&self, action: RecoveryAction, strategy: Arc<dyn RecoveryStrategy>) {
        tracing::debug!(action = %action, "Registered recovery strategy");
        self.inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action, strategy);
    }

    pub async fn record_failure(
        &self,
        service: &str,
        operation: &str,
        kind: ErrorKind,
        error: &str,
    ) -> FailurePattern {
        self.record_failure_at(service, operation, kind, error, Utc::now())
            .await
    }

    /// Record one failure observed at `now`. Runs the service's recovery
    /// action when the pattern reaches its threshold within the window.
    pub async fn record_failure_at(
        &self,
        service: &str,
        operation: &str,
        kind: ErrorKind,
        error: &str,
        now: DateTime<Utc>,
    ) -> FailurePattern {
        let policy = self.policy_for(service);
        let key = PatternKey::new(service, operation, kind);
        let window = chrono::Duration::from_std(policy.window).unwrap_or(chrono::Duration::MAX);

        let (snapshot, triggered) = {
            let mut patterns = lock(&self.inner.patterns);
            let pattern = patterns
                .entry(key.clone())
                .or_insert_with(|| FailurePattern {
                    key: key.clone(),
                    count: 0,
                    first_occurrence: now,
                    last_occurrence: now,
                    last_error: String::new(),
                    recovery_action: None,
                    recoveries: 0,
                    recent: VecDeque::new(),
                });

            pattern.count += 1;
            if now > pattern.last_occurrence {
                pattern.last_occurrence = now;
            }
            pattern.last_error = error.to_string();
            pattern.recent.push_back(now);
            while pattern
                .recent
                .front()
                .is_some_and(|at| now.signed_duration_since(*at) > window)
            {
                pattern.recent.pop_front();
            }

            let triggered = pattern.recent.len() as u32 >= policy.threshold;
            if triggered {
                pattern.recent.clear();
                pattern.recovery_action = Some(policy.action);
                pattern.recoveries += 1;
            }
            (pattern.clone(), triggered)
        };

        tracing::debug!(
            pattern = %key,
            count = snapshot.count,
            "Recorded failure"
        );

        if triggered {
            tracing::warn!(
                pattern = %key,
                action = %policy.action,
                threshold = policy.threshold,
                "Failure pattern reached threshold, starting recovery"
            );
            let context = RecoveryContext {
                action: policy.action,
                service: service.to_string(),
                operation: Some(operation.to_string()),
                error_kind: Some(kind),
                reason: format!("{} failures of {} within {:?}", policy.threshold, key, policy.window),
            };
            // Logged inside; never retried from here.
            let _ = self.run_recovery(&context).await;
        }

        snapshot
    }

    /// Run the strategy registered for `context.action`.
    pub async fn run_recovery(&self, context: &RecoveryContext) -> Result<(), MonitorError> {
        let strategy = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context.action)
            .cloned();

        let result = match strategy {
            Some(strategy) => strategy
                .recover(context)
                .await
                .map_err(MonitorError::Recovery),
            None => Err(MonitorError::NoStrategy(context.action.to_string())),
        };

        match &result {
            Ok(()) => tracing::info!(
                action = %context.action,
                service = %context.service,
                "Recovery action completed"
            ),
            Err(e) => tracing::error!(
                action = %context.action,
                service = %context.service,
                "Recovery action failed: {}",
                e
            ),
        }

        let mut attempts = lock(&self.inner.attempts);
        attempts.push_back(RecoveryAttempt {
            action: context.action,
            service: context.service.clone(),
            reason: context.reason.clone(),
            succeeded: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            at: Utc::now(),
        });
        while attempts.len() > RECOVERY_HISTORY {
            attempts.pop_front();
        }

        result
    }

    /// All patterns, most frequent first.
    pub fn failure_patterns(&self) -> Vec<FailurePattern> {
        let mut patterns: Vec<FailurePattern> =
            lock(&self.inner.patterns).values().cloned().collect();
        patterns.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_occurrence.cmp(&a.last_occurrence))
        });
        patterns
    }

    pub fn pattern(&self, service: &str, operation: &str, kind: ErrorKind) -> Option<FailurePattern> {
        lock(&self.inner.patterns)
            .get(&PatternKey::new(service, operation, kind))
            .cloned()
    }

    pub fn recovery_status(&self) -> RecoveryStatus {
        let (patterns, total_failures) = {
            let patterns = lock(&self.inner.patterns);
            (patterns.len(), patterns.values().map(|p| p.count).sum())
        };
        let mut strategies: Vec<RecoveryAction> = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        strategies.sort();

        RecoveryStatus {
            patterns,
            total_failures,
            strategies,
            recent_attempts: lock(&self.inner.attempts).iter().cloned().collect(),
        }
    }

    /// Drop patterns whose last occurrence is older than the retention.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let retention =
            chrono::Duration::from_std(self.inner.retention).unwrap_or(chrono::Duration::MAX);
        let mut patterns = lock(&self.inner.patterns);
        let before = patterns.len();
        patterns.retain(|_, p| now.signed_duration_since(p.last_occurrence) <= retention);
        let removed = before - patterns.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned failure patterns");
        }
        removed
    }

    /// Prune every `interval` until `token` is cancelled.
    pub fn start_pruner(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        recorder.prune(Utc::now());
                    }
                }
            }
        })
    }
}

impl MetricSource for FailurePatternRecorder {
    fn collect(&self) -> MetricsFuture<'_> {
        let status = self.recovery_status();
        Box::pin(async move {
            MetricSnapshot::from([
                (FAILURE_PATTERNS.to_string(), status.patterns as f64),
                (FAILURES_TOTAL.to_string(), status.total_failures as f64),
            ])
        })
    }
}
