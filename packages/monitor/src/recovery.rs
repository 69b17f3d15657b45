//! Recovery actions and the strategies that carry them out.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pipeline_core::ErrorKind;
use serde::{Deserialize, Serialize};

/// Automated reaction to a repeated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Move a failing provider to the back of its chain.
    RotateProvider,
    /// Re-queue failed jobs so the backlog drains.
    DrainQueueBacklog,
    /// Re-establish a store connection.
    Reconnect,
    /// Release memory and take on less work.
    ShedLoad,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RotateProvider => "rotate_provider",
            Self::DrainQueueBacklog => "drain_queue_backlog",
            Self::Reconnect => "reconnect",
            Self::ShedLoad => "shed_load",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a service's failures call for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Failures within `window` that trigger the action.
    pub threshold: u32,
    pub window: Duration,
    pub action: RecoveryAction,
}

impl RecoveryPolicy {
    pub fn new(action: RecoveryAction) -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(5 * 60),
            action,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Default mapping from a service name to its policy. Anything that is
    /// not an internal service is an external provider.
    pub fn for_service(service: &str) -> Self {
        let action = match service {
            "database" | "db" => RecoveryAction::Reconnect,
            "queue" | "job-queue" => RecoveryAction::DrainQueueBacklog,
            "memory" | "admission" => RecoveryAction::ShedLoad,
            _ => RecoveryAction::RotateProvider,
        };
        Self::new(action)
    }
}

/// What a strategy is asked to recover from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub action: RecoveryAction,
    pub service: String,
    pub operation: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub reason: String,
}

pub type RecoveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Carries out one recovery action.
pub trait RecoveryStrategy: Send + Sync + 'static {
    fn recover<'a>(&'a self, context: &'a RecoveryContext) -> RecoveryFuture<'a>;
}

/// Strategy from a closure.
pub struct FnStrategy<F> {
    f: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(RecoveryContext) -> RecoveryFuture<'static> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> RecoveryStrategy for FnStrategy<F>
where
    F: Fn(RecoveryContext) -> RecoveryFuture<'static> + Send + Sync + 'static,
{
    fn recover<'a>(&'a self, context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        (self.f)(context.clone())
    }
}

/// Record of one recovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub action: RecoveryAction,
    pub service: String,
    pub reason: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        assert_eq!(
            RecoveryPolicy::for_service("database").action,
            RecoveryAction::Reconnect
        );
        assert_eq!(
            RecoveryPolicy::for_service("queue").action,
            RecoveryAction::DrainQueueBacklog
        );
        assert_eq!(
            RecoveryPolicy::for_service("memory").action,
            RecoveryAction::ShedLoad
        );
        let provider = RecoveryPolicy::for_service("openai");
        assert_eq!(provider.action, RecoveryAction::RotateProvider);
        assert_eq!(provider.threshold, 5);
        assert_eq!(provider.window, Duration::from_secs(300));
    }
}
