use thiserror::Error;

/// Errors from the failure recorder and the alert engine.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert rule already exists: {0}")]
    DuplicateRule(String),

    #[error("Webhook delivery failed: {0}")]
    Webhook(String),

    #[error("No webhook URL configured")]
    NoWebhook,

    #[error("Recovery failed: {0}")]
    Recovery(String),

    #[error("No recovery strategy registered for {0}")]
    NoStrategy(String),
}

impl From<reqwest::Error> for MonitorError {
    fn from(e: reqwest::Error) -> Self {
        MonitorError::Webhook(e.to_string())
    }
}
