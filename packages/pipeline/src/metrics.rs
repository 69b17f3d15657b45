//! Memory and queue metrics for the alert engine.

use actors::JobQueue;
use admission::AdmissionController;
use monitor::metrics::{
    ACTIVE_JOBS, MEMORY_PERCENTAGE, QUEUE_ACTIVE, QUEUE_BACKLOG, QUEUE_COMPLETED, QUEUE_FAILED,
};
use monitor::{MetricSnapshot, MetricSource, MetricsFuture};
use pipeline_core::{QueueStats, Stage};

/// Reads the admission controller and the six stage queues.
///
/// Totals go under the `queue.*` names; each queue also reports
/// `queue.<name>.backlog` and `queue.<name>.failed`.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    admission: AdmissionController,
    queue: JobQueue,
}

impl PipelineMetrics {
    pub fn new(admission: AdmissionController, queue: JobQueue) -> Self {
        Self { admission, queue }
    }

    async fn snapshot(&self) -> MetricSnapshot {
        let mut metrics = MetricSnapshot::new();
        if let Some(current) = self.admission.current() {
            metrics.insert(MEMORY_PERCENTAGE.to_string(), current.percentage);
        }
        metrics.insert(ACTIVE_JOBS.to_string(), self.admission.active_jobs() as f64);

        let mut totals = QueueStats::default();
        for stage in Stage::ALL {
            let name = stage.queue_name();
            match self.queue.stats(name).await {
                Ok(stats) => {
                    metrics.insert(format!("queue.{}.backlog", name), stats.backlog() as f64);
                    metrics.insert(format!("queue.{}.failed", name), stats.failed as f64);
                    totals.merge(&stats);
                }
                Err(e) => tracing::warn!(queue = %name, "Skipping queue in metrics: {}", e),
            }
        }

        metrics.insert(QUEUE_BACKLOG.to_string(), totals.backlog() as f64);
        metrics.insert(QUEUE_ACTIVE.to_string(), totals.active as f64);
        metrics.insert(QUEUE_FAILED.to_string(), totals.failed as f64);
        metrics.insert(QUEUE_COMPLETED.to_string(), totals.completed as f64);
        metrics
    }
}

impl MetricSource for PipelineMetrics {
    fn collect(&self) -> MetricsFuture<'_> {
        Box::pin(self.snapshot())
    }
}
