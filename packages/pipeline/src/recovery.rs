//! Recovery strategies wired to the pipeline's components.

use std::sync::Arc;
use std::time::Duration;

use actors::JobQueue;
use admission::AdmissionController;
use db::Database;
use monitor::{
    FailurePatternRecorder, RecoveryAction, RecoveryContext, RecoveryFuture, RecoveryStrategy,
};
use pipeline_core::Stage;

use crate::collaborators::StageProviders;

/// Demotes the failing provider in every chain that contains it.
#[derive(Debug, Clone)]
pub struct ProviderRotation {
    providers: StageProviders,
}

impl ProviderRotation {
    pub fn new(providers: StageProviders) -> Self {
        Self { providers }
    }
}

impl RecoveryStrategy for ProviderRotation {
    fn recover<'a>(&'a self, context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        Box::pin(async move {
            let demoted = self
                .providers
                .chains()
                .filter(|(_, chain)| chain.demote(&context.service))
                .count();
            if demoted == 0 {
                return Err(format!("provider {} is in no chain", context.service));
            }
            tracing::info!(provider = %context.service, chains = demoted, "Provider rotated");
            Ok(())
        })
    }
}

/// Re-queues failed jobs. Targets the queue named by the context's
/// operation when it is a stage queue, otherwise every stage queue.
#[derive(Debug, Clone)]
pub struct QueueDrain {
    queue: JobQueue,
}

impl QueueDrain {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

impl RecoveryStrategy for QueueDrain {
    fn recover<'a>(&'a self, context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        Box::pin(async move {
            let targets: Vec<&'static str> = match context
                .operation
                .as_deref()
                .and_then(Stage::from_queue_name)
            {
                Some(stage) => vec![stage.queue_name()],
                None => Stage::ALL.iter().map(|s| s.queue_name()).collect(),
            };

            let mut requeued = 0u64;
            let mut errors = Vec::new();
            for name in targets {
                match self.queue.retry_failed(name).await {
                    Ok(count) => requeued += count,
                    Err(e) => errors.push(format!("{}: {}", name, e)),
                }
            }

            tracing::info!(requeued, failed_queues = errors.len(), "Queue backlog drained");
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join("; "))
            }
        })
    }
}

/// Runs the admission controller's cleanup callbacks.
#[derive(Debug, Clone)]
pub struct LoadShedding {
    admission: AdmissionController,
}

impl LoadShedding {
    pub fn new(admission: AdmissionController) -> Self {
        Self { admission }
    }
}

impl RecoveryStrategy for LoadShedding {
    fn recover<'a>(&'a self, _context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        Box::pin(async move {
            let outcomes = self.admission.force_reclaim().await;
            let failed: Vec<String> = outcomes
                .iter()
                .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {}", o.name, e)))
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(failed.join("; "))
            }
        })
    }
}

/// Probes the store until it answers again.
#[derive(Debug, Clone)]
pub struct StoreReconnect {
    db: Database,
    attempts: u32,
    delay: Duration,
}

impl StoreReconnect {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RecoveryStrategy for StoreReconnect {
    fn recover<'a>(&'a self, _context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        Box::pin(async move {
            let mut last_error = String::new();
            for attempt in 1..=self.attempts {
                match self.db.ping().await {
                    Ok(()) => {
                        tracing::info!(attempt, "Store reachable");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(attempt, "Store ping failed: {}", e);
                        last_error = e.to_string();
                    }
                }
                if attempt < self.attempts {
                    tokio::time::sleep(self.delay).await;
                }
            }
            Err(last_error)
        })
    }
}

/// Register one strategy per recovery action.
pub fn register_strategies(
    recorder: &FailurePatternRecorder,
    providers: StageProviders,
    queue: JobQueue,
    admission: AdmissionController,
    db: Database,
) {
    recorder.register_strategy(
        RecoveryAction::RotateProvider,
        Arc::new(ProviderRotation::new(providers)),
    );
    recorder.register_strategy(
        RecoveryAction::DrainQueueBacklog,
        Arc::new(QueueDrain::new(queue)),
    );
    recorder.register_strategy(RecoveryAction::ShedLoad, Arc::new(LoadShedding::new(admission)));
    recorder.register_strategy(RecoveryAction::Reconnect, Arc::new(StoreReconnect::new(db)));
}
