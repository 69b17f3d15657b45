//! Process wiring: builds every component and owns the background tasks.

use std::sync::Arc;

use actors::JobQueue;
use admission::lifecycle::{install_panic_hook, wait_for_shutdown_signal};
use admission::{
    AdmissionController, CleanupOutcome, MemoryReport, MemorySampler, SystemMemorySampler,
};
use db::Database;
use futures_util::future::join_all;
use monitor::{AlertEngine, ApiCounters, CompositeMetrics, FailurePatternRecorder};
use pipeline_core::Stage;
use providers::FallbackExecutor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::Collaborators;
use crate::events::{JobEventCounters, spawn_event_logger};
use crate::handlers::{StageContext, StageHandler};
use crate::metrics::PipelineMetrics;
use crate::orchestrator::Orchestrator;
use crate::recovery::register_strategies;
use crate::{PipelineConfig, PipelineError};

/// A running pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    db: Database,
    queue: JobQueue,
    orchestrator: Orchestrator,
    admission: AdmissionController,
    recorder: FailurePatternRecorder,
    alerts: AlertEngine,
    executor: FallbackExecutor,
    job_events: Arc<JobEventCounters>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("queue", &self.queue)
            .field("admission", &self.admission)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Pipeline {
    /// Start with memory sampled from the host.
    pub async fn start(
        config: PipelineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, PipelineError> {
        Self::start_with_sampler(config, collaborators, Arc::new(SystemMemorySampler::new())).await
    }

    /// Start with a custom memory sampler.
    pub async fn start_with_sampler(
        config: PipelineConfig,
        collaborators: Collaborators,
        sampler: Arc<dyn MemorySampler>,
    ) -> Result<Self, PipelineError> {
        tracing::info!("Starting candidate pipeline...");

        let db = db::init(&config.db).await?;
        let queue = JobQueue::start(db.clone()).await?;
        let admission = AdmissionController::new(config.admission.clone(), sampler);
        let token = CancellationToken::new();

        let counters = Arc::new(ApiCounters::new());
        let recorder = FailurePatternRecorder::new(config.failure_retention);
        let executor = FallbackExecutor::new(recorder.clone(), counters.clone())
            .with_cancellation(token.child_token());

        let orchestrator = Orchestrator::new(queue.clone(), db.clone(), admission.clone())
            .with_max_stage_retries(config.max_stage_retries);

        register_strategies(
            &recorder,
            collaborators.providers.clone(),
            queue.clone(),
            admission.clone(),
            db.clone(),
        );

        let context = Arc::new(StageContext {
            collaborators,
            executor: executor.clone(),
            admission: admission.clone(),
        });
        for stage in Stage::ALL {
            let name = stage.queue_name();
            let queue_config = config.queue_config(stage);
            let concurrency = queue_config.concurrency;
            queue.create_queue(name, queue_config).await?;
            queue
                .consume(
                    name,
                    concurrency,
                    StageHandler::shared(stage, context.clone()),
                    Arc::new(admission.clone()),
                )
                .await?;
            tracing::info!(queue = %name, concurrency, "Stage queue ready");
        }

        {
            let orchestrator = orchestrator.clone();
            let grace = config.cleanup_grace;
            admission.register_cleanup("archive-finished-jobs", move || {
                let orchestrator = orchestrator.clone();
                Box::pin(async move {
                    let outcomes = orchestrator.cleanup(grace).await;
                    match outcomes.iter().find_map(|o| o.error.clone()) {
                        Some(error) => Err(error),
                        None => Ok(()),
                    }
                })
            });
        }
        {
            let recorder = recorder.clone();
            admission.register_cleanup("prune-failure-patterns", move || {
                let recorder = recorder.clone();
                Box::pin(async move {
                    recorder.prune(chrono::Utc::now());
                    Ok::<(), String>(())
                })
            });
        }

        let job_events = Arc::new(JobEventCounters::new());
        let metrics = CompositeMetrics::new()
            .with(Arc::new(PipelineMetrics::new(admission.clone(), queue.clone())))
            .with(counters)
            .with(Arc::new(recorder.clone()))
            .with(job_events.clone());
        let alerts = AlertEngine::with_default_rules(
            config.alerts.clone(),
            Arc::new(metrics),
            Some(recorder.clone()),
        )?;

        let tasks = vec![
            admission.start(token.clone()),
            recorder.start_pruner(config.prune_interval, token.clone()),
            alerts.start(token.clone()),
            spawn_event_logger(
                queue.subscribe(),
                job_events.clone(),
                recorder.clone(),
                token.clone(),
            ),
        ];

        tracing::info!("Candidate pipeline started");
        Ok(Self {
            config,
            db,
            queue,
            orchestrator,
            admission,
            recorder,
            alerts,
            executor,
            job_events,
            token,
            tasks,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn recorder(&self) -> &FailurePatternRecorder {
        &self.recorder
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn executor(&self) -> &FallbackExecutor {
        &self.executor
    }

    pub fn job_events(&self) -> &JobEventCounters {
        &self.job_events
    }

    pub fn memory_report(&self) -> MemoryReport {
        self.admission.memory_report()
    }

    /// Route panics through the admission controller's cleanup.
    pub fn install_panic_hook(&self) {
        install_panic_hook(self.admission.clone(), self.config.panic_grace);
    }

    /// Stop background tasks, run cleanup callbacks and stop the queues.
    pub async fn shutdown(self) -> Result<Vec<CleanupOutcome>, PipelineError> {
        tracing::info!("Shutting down candidate pipeline...");
        self.token.cancel();

        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        let outcomes = self.admission.run_cleanup().await;
        self.queue.shutdown().await?;

        tracing::info!("Candidate pipeline stopped");
        Ok(outcomes)
    }

    /// Serve until ctrl-c or SIGTERM, then shut down.
    pub async fn run_until_shutdown(self) -> Result<Vec<CleanupOutcome>, PipelineError> {
        wait_for_shutdown_signal().await;
        self.shutdown().await
    }
}
