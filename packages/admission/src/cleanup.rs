//! Best-effort cleanup callbacks run under memory pressure and on exit.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

pub type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

type CleanupFn = dyn Fn() -> CleanupFuture + Send + Sync;

#[derive(Clone)]
pub(crate) struct CleanupCallback {
    pub name: String,
    run: Arc<CleanupFn>,
}

impl CleanupCallback {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> CleanupFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }
}

/// How one callback went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub name: String,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl CleanupOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run every callback concurrently, each bounded by `timeout`.
pub(crate) async fn run_all(
    callbacks: Vec<CleanupCallback>,
    timeout: Duration,
) -> Vec<CleanupOutcome> {
    let runs = callbacks.into_iter().map(|callback| async move {
        let started = Instant::now();
        let future = AssertUnwindSafe((callback.run)()).catch_unwind();
        let error = match tokio::time::timeout(timeout, future).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e),
            Ok(Err(_)) => Some("cleanup callback panicked".to_string()),
            Err(_) => Some(format!("timed out after {}ms", timeout.as_millis())),
        };

        if let Some(ref e) = error {
            tracing::warn!(callback = %callback.name, "Cleanup callback failed: {}", e);
        }

        CleanupOutcome {
            name: callback.name,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    });

    join_all(runs).await
}
