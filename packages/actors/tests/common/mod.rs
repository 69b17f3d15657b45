use std::time::{Duration, Instant};

use actors::{JobQueue, QueueError};
use db::DbConfig;
use pipeline_core::{BackoffPolicy, CandidateRef, QueueConfig, QueueStats, Stage, StagePayload};

pub const QUEUE: &str = "resume-processing";

pub async fn setup_queue() -> Result<(db::Database, JobQueue), Box<dyn std::error::Error>> {
    let db = db::init(&DbConfig::memory()).await?;
    let queue = JobQueue::start(db.clone()).await?;
    Ok((db, queue))
}

/// Config with short intervals so tests settle quickly.
pub fn fast_config() -> QueueConfig {
    let mut config = QueueConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_backoff(BackoffPolicy::exponential(Duration::from_millis(20)));
    config.tick_interval_ms = 50;
    config
}

pub fn payload(candidate_id: &str) -> StagePayload {
    StagePayload::for_stage(Stage::Resume, CandidateRef::new(candidate_id, "jp1"))
}

/// Poll stats until `done` holds or five seconds pass.
pub async fn wait_for_stats<F>(queue: &JobQueue, name: &str, done: F) -> Result<QueueStats, QueueError>
where
    F: Fn(&QueueStats) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = queue.stats(name).await?;
        if done(&stats) || Instant::now() > deadline {
            return Ok(stats);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
