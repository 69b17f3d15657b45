#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use monitor::{ApiCounters, FailurePatternRecorder};
use pipeline_core::ErrorKind;
use providers::{FallbackExecutor, Provider, ProviderError, ProviderFuture};
use serde_json::Value;

/// Provider that always fails with the same error.
pub struct FailingProvider {
    pub kind: ErrorKind,
    pub calls: AtomicU32,
}

impl FailingProvider {
    pub fn new(kind: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for FailingProvider {
    fn call<'a>(&'a self, _request: &'a Value) -> ProviderFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let error = ProviderError::new(self.kind, format!("{} from test provider", self.kind));
        Box::pin(async move { Err(error) })
    }
}

/// Provider that answers with a fixed value after an optional delay.
pub struct FixedProvider {
    pub value: Value,
    pub delay: Duration,
    pub calls: AtomicU32,
}

impl FixedProvider {
    pub fn new(value: Value) -> Arc<Self> {
        Self::slow(value, Duration::ZERO)
    }

    pub fn slow(value: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            value,
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for FixedProvider {
    fn call<'a>(&'a self, _request: &'a Value) -> ProviderFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.value.clone())
        })
    }
}

pub fn executor() -> FallbackExecutor {
    FallbackExecutor::new(
        FailurePatternRecorder::default(),
        Arc::new(ApiCounters::new()),
    )
    .with_backoff_base(Duration::from_millis(1))
}
