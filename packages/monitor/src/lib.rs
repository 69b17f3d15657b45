//! Failure tracking and alerting.
//!
//! - [`FailurePatternRecorder`] counts failures by service, operation and
//!   error kind and runs a recovery strategy when a service keeps failing.
//! - [`AlertEngine`] samples named metrics on a tick, evaluates declarative
//!   rules with cooldowns, and dispatches log, webhook and recovery actions.

mod engine;
mod error;
pub mod metrics;
mod recorder;
mod recovery;
mod rules;

pub use engine::{AlertConfig, AlertEngine, Notification, NotificationStats};
pub use error::MonitorError;
pub use metrics::{
    ApiCounters, ApiSnapshot, CompositeMetrics, GaugeSet, MetricSnapshot, MetricSource,
    MetricsFuture,
};
pub use recorder::{FailurePattern, FailurePatternRecorder, PatternKey, RecoveryStatus};
pub use recovery::{
    FnStrategy, RecoveryAction, RecoveryAttempt, RecoveryContext, RecoveryFuture, RecoveryPolicy,
    RecoveryStrategy,
};
pub use rules::{
    Aggregation, AlertAction, AlertCondition, AlertRule, ConditionKind, Operator, Severity,
};
