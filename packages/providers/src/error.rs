use pipeline_core::ErrorKind;
use thiserror::Error;

/// One failed provider call, classified.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Classify from an optional status code and the message.
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(status, &message),
            message,
            status,
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("timed out after {}ms", after_ms))
    }
}

/// Errors surfaced by the fallback executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("all providers failed after {attempts} attempts, last error: {last_error}")]
    AllProvidersFailed {
        attempts: u32,
        last_provider: String,
        last_error: ProviderError,
    },

    #[error("no providers configured")]
    NoProviders,

    #[error("execution cancelled")]
    Cancelled,
}
