//! Alert rule engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::MonitorError;
use crate::metrics::MetricSource;
use crate::recorder::FailurePatternRecorder;
use crate::recovery::RecoveryContext;
use crate::rules::{AlertAction, AlertRule, ConditionKind, Severity};

/// Settings for the alert engine.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub evaluation_interval: Duration,
    /// Notifications kept before the oldest are dropped.
    pub max_notifications: usize,
    /// Target for webhook actions that name no URL.
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    /// How long metric samples are kept for windowed conditions.
    pub sample_retention: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(60),
            max_notifications: 1000,
            webhook_url: None,
            webhook_timeout: Duration::from_secs(10),
            sample_retention: Duration::from_secs(60 * 60),
        }
    }
}

impl AlertConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    pub fn with_max_notifications(mut self, max: usize) -> Self {
        self.max_notifications = max.max(1);
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }
}

/// A fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unacknowledged: usize,
    pub by_severity: HashMap<Severity, usize>,
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    alert: &'a Notification,
    rule: &'a AlertRule,
    timestamp: DateTime<Utc>,
}

type Series = HashMap<String, VecDeque<(DateTime<Utc>, f64)>>;

struct Inner {
    config: AlertConfig,
    metrics: Arc<dyn MetricSource>,
    recorder: Option<FailurePatternRecorder>,
    http: reqwest::Client,
    rules: Mutex<Vec<AlertRule>>,
    notifications: Mutex<VecDeque<Notification>>,
    series: Mutex<Series>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Evaluates alert rules against metrics and dispatches their actions.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("rules", &lock(&self.inner.rules).len())
            .field("notifications", &lock(&self.inner.notifications).len())
            .finish()
    }
}

impl AlertEngine {
    /// Engine without rules. Recovery actions need a `recorder`.
    pub fn new(
        config: AlertConfig,
        metrics: Arc<dyn MetricSource>,
        recorder: Option<FailurePatternRecorder>,
    ) -> Result<Self, MonitorError> {
        let http = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                metrics,
                recorder,
                http,
                rules: Mutex::new(Vec::new()),
                notifications: Mutex::new(VecDeque::new()),
                series: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Engine with the default rule set.
    pub fn with_default_rules(
        config: AlertConfig,
        metrics: Arc<dyn MetricSource>,
        recorder: Option<FailurePatternRecorder>,
    ) -> Result<Self, MonitorError> {
        let engine = Self::new(config, metrics, recorder)?;
        *lock(&engine.inner.rules) = AlertRule::defaults();
        Ok(engine)
    }

    pub fn add_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        let mut rules = lock(&self.inner.rules);
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(MonitorError::DuplicateRule(rule.id));
        }
        tracing::info!(rule = %rule.id, "Added alert rule");
        rules.push(rule);
        Ok(())
    }

    /// Replace the rule with the same id.
    pub fn update_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        let mut rules = lock(&self.inner.rules);
        let existing = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| MonitorError::RuleNotFound(rule.id.clone()))?;
        *existing = rule;
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> Result<AlertRule, MonitorError> {
        let mut rules = lock(&self.inner.rules);
        let index = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| MonitorError::RuleNotFound(id.to_string()))?;
        Ok(rules.remove(index))
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<(), MonitorError> {
        let mut rules = lock(&self.inner.rules);
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MonitorError::RuleNotFound(id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn get_rule(&self, id: &str) -> Option<AlertRule> {
        lock(&self.inner.rules).iter().find(|r| r.id == id).cloned()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        lock(&self.inner.rules).clone()
    }

    /// Notifications, newest first.
    pub fn notifications(&self, unacknowledged_only: bool) -> Vec<Notification> {
        lock(&self.inner.notifications)
            .iter()
            .rev()
            .filter(|n| !unacknowledged_only || !n.acknowledged)
            .cloned()
            .collect()
    }

    pub fn notification_stats(&self) -> NotificationStats {
        let notifications = lock(&self.inner.notifications);
        let mut stats = NotificationStats {
            total: notifications.len(),
            ..Default::default()
        };
        for n in notifications.iter() {
            if !n.acknowledged {
                stats.unacknowledged += 1;
            }
            *stats.by_severity.entry(n.severity).or_default() += 1;
        }
        stats
    }

    /// Mark a notification acknowledged. `false` if it is unknown or was
    /// already acknowledged.
    pub fn acknowledge_notification(&self, id: &str, by: Option<&str>) -> bool {
        let mut notifications = lock(&self.inner.notifications);
        let Some(notification) = notifications.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if notification.acknowledged {
            return false;
        }
        notification.acknowledged = true;
        notification.acknowledged_at = Some(Utc::now());
        notification.acknowledged_by = by.map(str::to_string);
        true
    }

    async fn sample_metrics(&self, now: DateTime<Utc>) {
        let snapshot = self.inner.metrics.collect().await;
        let retention = chrono::Duration::from_std(self.inner.config.sample_retention)
            .unwrap_or(chrono::Duration::MAX);

        let mut series = lock(&self.inner.series);
        for (name, value) in snapshot {
            series.entry(name).or_default().push_back((now, value));
        }
        for samples in series.values_mut() {
            while samples
                .front()
                .is_some_and(|(at, _)| now.signed_duration_since(*at) > retention)
            {
                samples.pop_front();
            }
        }
    }

    fn metric_value(&self, rule: &AlertRule, now: DateTime<Utc>) -> Option<f64> {
        let series = lock(&self.inner.series);
        let collect = |metric: &str| -> Option<Vec<(DateTime<Utc>, f64)>> {
            series.get(metric).map(|s| s.iter().copied().collect())
        };
        let samples = collect(&rule.condition.metric)?;
        match (rule.condition.kind, rule.condition.denominator.as_deref()) {
            (ConditionKind::Ratio, Some(denominator)) => {
                let totals = collect(denominator)?;
                rule.condition.evaluate_ratio(&samples, &totals, now)
            }
            _ => rule.condition.evaluate(&samples, now),
        }
    }

    pub async fn evaluate(&self) -> Vec<Notification> {
        self.evaluate_at(Utc::now()).await
    }

    /// Sample metrics and evaluate every enabled rule as of `now`.
    /// Returns the notifications created.
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.sample_metrics(now).await;

        let rules = self.rules();
        let mut fired = Vec::new();
        for rule in rules.into_iter().filter(|r| r.enabled) {
            if rule.in_cooldown(now) {
                tracing::trace!(rule = %rule.id, "Rule in cooldown");
                continue;
            }
            let Some(value) = self.metric_value(&rule, now) else {
                continue;
            };
            if !rule.condition.operator.compare(value, rule.condition.threshold) {
                continue;
            }

            let Some(notification) = self.trigger(&rule, value, now) else {
                continue;
            };
            self.execute_actions(&rule, &notification).await;
            fired.push(notification);
        }
        fired
    }

    /// Stamp the stored rule and record a notification. `None` when another
    /// evaluation fired the rule first or the rule was removed meanwhile.
    fn trigger(&self, rule: &AlertRule, value: f64, now: DateTime<Utc>) -> Option<Notification> {
        {
            let mut rules = lock(&self.inner.rules);
            let stored = rules.iter_mut().find(|r| r.id == rule.id)?;
            if stored.in_cooldown(now) {
                return None;
            }
            stored.last_triggered = Some(now);
        }

        let notification = Notification {
            id: Ulid::new().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            message: format!("{}: {} (value {:.2})", rule.name, rule.condition.describe(), value),
            value,
            timestamp: now,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
        };

        let mut notifications = lock(&self.inner.notifications);
        notifications.push_back(notification.clone());
        while notifications.len() > self.inner.config.max_notifications {
            notifications.pop_front();
        }

        Some(notification)
    }

    async fn execute_actions(&self, rule: &AlertRule, notification: &Notification) {
        for action in &rule.actions {
            let result = match action {
                AlertAction::Log => {
                    match rule.severity {
                        Severity::Critical => tracing::error!(
                            rule = %rule.id,
                            value = notification.value,
                            "ALERT: {}",
                            notification.message
                        ),
                        Severity::Warning => tracing::warn!(
                            rule = %rule.id,
                            value = notification.value,
                            "ALERT: {}",
                            notification.message
                        ),
                        Severity::Info => tracing::info!(
                            rule = %rule.id,
                            value = notification.value,
                            "ALERT: {}",
                            notification.message
                        ),
                    }
                    Ok(())
                }
                AlertAction::Webhook { url } => {
                    self.send_webhook(url.as_deref(), rule, notification).await
                }
                AlertAction::Recovery { action } => match &self.inner.recorder {
                    Some(recorder) => {
                        let context = RecoveryContext {
                            action: *action,
                            service: format!("alert:{}", rule.id),
                            operation: None,
                            error_kind: None,
                            reason: notification.message.clone(),
                        };
                        recorder.run_recovery(&context).await
                    }
                    None => Err(MonitorError::NoStrategy(action.to_string())),
                },
            };

            if let Err(e) = result {
                tracing::warn!(rule = %rule.id, "Alert action failed: {}", e);
            }
        }
    }

    async fn send_webhook(
        &self,
        url: Option<&str>,
        rule: &AlertRule,
        notification: &Notification,
    ) -> Result<(), MonitorError> {
        let url = url
            .or(self.inner.config.webhook_url.as_deref())
            .ok_or(MonitorError::NoWebhook)?;

        let envelope = WebhookEnvelope {
            alert: notification,
            rule,
            timestamp: Utc::now(),
        };
        let response = self.inner.http.post(url).json(&envelope).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::Webhook(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        tracing::debug!(rule = %rule.id, "Webhook delivered");
        Ok(())
    }

    /// Evaluate every `evaluation_interval` until `token` is cancelled.
    pub fn start(&self, token: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        let interval = self.inner.config.evaluation_interval;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Alert evaluation stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let fired = engine.evaluate().await;
                        if !fired.is_empty() {
                            tracing::info!(count = fired.len(), "Alert rules fired");
                        }
                    }
                }
            }
        })
    }
}
