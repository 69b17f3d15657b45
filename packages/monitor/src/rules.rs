//! Declarative alert rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::recovery::RecoveryAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
            Self::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// How samples inside the time window are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Last,
    Avg,
    Min,
    Max,
    Sum,
    Count,
}

impl Aggregation {
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        let last = *values.last()?;
        let value = match self {
            Self::Last => last,
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Aggregated value compared to the threshold.
    Threshold,
    /// Increase per minute across the window compared to the threshold.
    Rate,
    /// Increase of `metric` as a percentage of the increase of
    /// `denominator` across the window.
    Ratio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub kind: ConditionKind,
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    pub time_window_minutes: u32,
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<String>,
}

impl AlertCondition {
    pub fn threshold(metric: &str, operator: Operator, threshold: f64) -> Self {
        Self {
            kind: ConditionKind::Threshold,
            metric: metric.to_string(),
            operator,
            threshold,
            time_window_minutes: 0,
            aggregation: Aggregation::Last,
            denominator: None,
        }
    }

    pub fn rate(metric: &str, operator: Operator, per_minute: f64, window_minutes: u32) -> Self {
        Self {
            kind: ConditionKind::Rate,
            metric: metric.to_string(),
            operator,
            threshold: per_minute,
            time_window_minutes: window_minutes.max(1),
            aggregation: Aggregation::Last,
            denominator: None,
        }
    }

    /// Percentage of `denominator`'s growth matched by `metric`'s growth
    /// inside the window. Both metrics are running totals.
    pub fn ratio(
        metric: &str,
        denominator: &str,
        operator: Operator,
        percent: f64,
        window_minutes: u32,
    ) -> Self {
        Self {
            kind: ConditionKind::Ratio,
            metric: metric.to_string(),
            operator,
            threshold: percent,
            time_window_minutes: window_minutes.max(1),
            aggregation: Aggregation::Last,
            denominator: Some(denominator.to_string()),
        }
    }

    pub fn over(mut self, window_minutes: u32, aggregation: Aggregation) -> Self {
        self.time_window_minutes = window_minutes;
        self.aggregation = aggregation;
        self
    }

    fn window(&self, samples: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Vec<(DateTime<Utc>, f64)> {
        let since = now - chrono::Duration::minutes(i64::from(self.time_window_minutes));
        samples
            .iter()
            .copied()
            .filter(|(at, _)| *at >= since && *at <= now)
            .collect()
    }

    fn increase(&self, samples: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Option<f64> {
        let window = self.window(samples, now);
        let (_, first) = *window.first()?;
        let (_, last) = *window.last()?;
        Some(last - first)
    }

    /// Value of a ratio condition from the numerator and denominator series.
    /// `None` when the denominator did not grow inside the window.
    pub fn evaluate_ratio(
        &self,
        numerator: &[(DateTime<Utc>, f64)],
        denominator: &[(DateTime<Utc>, f64)],
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let total = self.increase(denominator, now)?;
        if total <= 0.0 {
            return None;
        }
        let part = self.increase(numerator, now).unwrap_or(0.0);
        Some(part / total * 100.0)
    }

    /// Value of the condition from timestamped samples, oldest first.
    /// Ratio conditions need both series, see [`Self::evaluate_ratio`].
    pub fn evaluate(&self, samples: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Option<f64> {
        let window = self.window(samples, now);

        match self.kind {
            ConditionKind::Threshold => {
                if self.time_window_minutes == 0 {
                    return samples.iter().rev().find(|(at, _)| *at <= now).map(|(_, v)| *v);
                }
                let values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
                self.aggregation.apply(&values)
            }
            ConditionKind::Rate => {
                let (first_at, first) = *window.first()?;
                let (last_at, last) = *window.last()?;
                let minutes = (last_at - first_at).num_milliseconds() as f64 / 60_000.0;
                if minutes <= 0.0 {
                    return None;
                }
                Some((last - first) / minutes)
            }
            ConditionKind::Ratio => None,
        }
    }

    pub fn describe(&self) -> String {
        match self.kind {
            ConditionKind::Threshold => format!(
                "{} {} {}",
                self.metric,
                self.operator.as_str(),
                self.threshold
            ),
            ConditionKind::Rate => format!(
                "rate({}) {} {}/min over {}m",
                self.metric,
                self.operator.as_str(),
                self.threshold,
                self.time_window_minutes
            ),
            ConditionKind::Ratio => format!(
                "{} / {} {} {}% over {}m",
                self.metric,
                self.denominator.as_deref().unwrap_or("?"),
                self.operator.as_str(),
                self.threshold,
                self.time_window_minutes
            ),
        }
    }
}

/// Something done when a rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Log,
    /// POST to `url`, or to the engine's configured URL.
    Webhook { url: Option<String> },
    Recovery { action: RecoveryAction },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub enabled: bool,
    pub cooldown_minutes: u32,
    pub actions: Vec<AlertAction>,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            severity: Severity::Warning,
            enabled: true,
            cooldown_minutes: 15,
            actions: vec![AlertAction::Log],
            last_triggered: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cooldown(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_actions(mut self, actions: Vec<AlertAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered.is_some_and(|at| {
            now < at + chrono::Duration::minutes(i64::from(self.cooldown_minutes))
        })
    }

    /// Rules installed at start-up.
    pub fn defaults() -> Vec<AlertRule> {
        let webhook = AlertAction::Webhook { url: None };
        vec![
            AlertRule::new(
                "memory_warning",
                "Memory usage high",
                AlertCondition::threshold(metrics::MEMORY_PERCENTAGE, Operator::Gte, 70.0),
            )
            .with_description("System memory above the warning tier")
            .with_cooldown(15),
            AlertRule::new(
                "memory_critical",
                "Memory usage critical",
                AlertCondition::threshold(metrics::MEMORY_PERCENTAGE, Operator::Gte, 85.0),
            )
            .with_description("System memory above the critical tier")
            .with_severity(Severity::Critical)
            .with_cooldown(5)
            .with_actions(vec![
                AlertAction::Log,
                webhook.clone(),
                AlertAction::Recovery {
                    action: RecoveryAction::ShedLoad,
                },
            ]),
            AlertRule::new(
                "api_error_rate",
                "API error rate high",
                AlertCondition::ratio(metrics::API_ERRORS, metrics::API_CALLS, Operator::Gt, 10.0, 5),
            )
            .with_description("More than 10% of provider calls failing")
            .with_actions(vec![AlertAction::Log, webhook.clone()]),
            AlertRule::new(
                "queue_backlog",
                "Queue backlog growing",
                AlertCondition::threshold(metrics::QUEUE_BACKLOG, Operator::Gt, 1000.0),
            )
            .with_description("Waiting and delayed jobs across stage queues")
            .with_cooldown(30)
            .with_actions(vec![
                AlertAction::Log,
                AlertAction::Recovery {
                    action: RecoveryAction::DrainQueueBacklog,
                },
            ]),
            AlertRule::new(
                "rate_limit_violations",
                "Provider rate limits hit",
                AlertCondition::rate(metrics::API_RATE_LIMITED, Operator::Gt, 10.0, 5),
            )
            .with_description("Rate-limit responses per minute")
            .with_cooldown(10)
            .with_actions(vec![AlertAction::Log, webhook]),
            AlertRule::new(
                "failed_jobs",
                "Failed jobs accumulating",
                AlertCondition::threshold(metrics::QUEUE_FAILED, Operator::Gt, 50.0),
            )
            .with_cooldown(30),
            AlertRule::new(
                "failure_patterns",
                "Recurring failure patterns",
                AlertCondition::threshold(metrics::FAILURE_PATTERNS, Operator::Gte, 10.0),
            )
            .with_severity(Severity::Info)
            .with_cooldown(60),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(now: DateTime<Utc>, minutes_ago: i64) -> DateTime<Utc> {
        now - chrono::Duration::minutes(minutes_ago)
    }

    #[test]
    fn test_operators() {
        assert!(Operator::Gt.compare(2.0, 1.0));
        assert!(!Operator::Gt.compare(1.0, 1.0));
        assert!(Operator::Gte.compare(1.0, 1.0));
        assert!(Operator::Lt.compare(0.5, 1.0));
        assert!(Operator::Eq.compare(1.0, 1.0));
        assert!(Operator::Ne.compare(1.5, 1.0));
    }

    #[test]
    fn test_threshold_aggregates_window() {
        let now = Utc::now();
        let samples = vec![(at(now, 10), 100.0), (at(now, 4), 10.0), (at(now, 1), 20.0)];

        let avg = AlertCondition::threshold("m", Operator::Gt, 0.0).over(5, Aggregation::Avg);
        assert_eq!(avg.evaluate(&samples, now), Some(15.0));

        let max = AlertCondition::threshold("m", Operator::Gt, 0.0).over(5, Aggregation::Max);
        assert_eq!(max.evaluate(&samples, now), Some(20.0));

        let count = AlertCondition::threshold("m", Operator::Gt, 0.0).over(15, Aggregation::Count);
        assert_eq!(count.evaluate(&samples, now), Some(3.0));

        let last = AlertCondition::threshold("m", Operator::Gt, 0.0);
        assert_eq!(last.evaluate(&samples, now), Some(20.0));
    }

    #[test]
    fn test_rate_per_minute() {
        let now = Utc::now();
        let samples = vec![(at(now, 4), 10.0), (at(now, 2), 40.0), (now, 70.0)];
        let rate = AlertCondition::rate("m", Operator::Gt, 10.0, 5);
        assert_eq!(rate.evaluate(&samples, now), Some(15.0));

        let single = vec![(now, 5.0)];
        assert_eq!(rate.evaluate(&single, now), None);
    }

    #[test]
    fn test_ratio_uses_growth_inside_window() {
        let now = Utc::now();
        let calls = vec![(at(now, 30), 1000.0), (at(now, 5), 1000.0), (now, 1010.0)];
        let errors = vec![(at(now, 30), 10.0), (at(now, 5), 10.0), (now, 15.0)];
        let ratio = AlertCondition::ratio("errors", "calls", Operator::Gt, 10.0, 5);
        assert_eq!(ratio.evaluate_ratio(&errors, &calls, now), Some(50.0));

        let idle = vec![(at(now, 5), 1010.0), (now, 1010.0)];
        assert_eq!(ratio.evaluate_ratio(&errors, &idle, now), None);
    }

    #[test]
    fn test_cooldown() {
        let now = Utc::now();
        let mut rule = AlertRule::new(
            "r",
            "rule",
            AlertCondition::threshold("m", Operator::Gt, 1.0),
        )
        .with_cooldown(10);
        assert!(!rule.in_cooldown(now));

        rule.last_triggered = Some(at(now, 5));
        assert!(rule.in_cooldown(now));

        rule.last_triggered = Some(at(now, 11));
        assert!(!rule.in_cooldown(now));
    }

    #[test]
    fn test_default_rules_are_unique() {
        let rules = AlertRule::defaults();
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), rules.len());
        assert!(rules.iter().all(|r| r.enabled));
    }
}
