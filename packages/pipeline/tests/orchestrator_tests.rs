#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{FnHandler, JobFilter};
use admission::AdmissionError;
use common::{setup, wait_for_progress};
use pipeline::PipelineError;
use pipeline_core::{
    BatchStatus, Job, JobResult, JobState, OpenGate, Priority, QueueState, Stage,
};

fn ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("cand-{}", i)).collect()
}

#[tokio::test]
async fn test_batch_progress_follows_resume_stage() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let batch = h.orchestrator.submit_batch(ids(3), "jp1").await?;
    assert_eq!(batch.total_candidates, 3);
    assert_eq!(batch.status, BatchStatus::Processing);

    let progress = h.orchestrator.batch_progress(batch.id).await?;
    assert_eq!(progress.total_jobs, 18);
    assert_eq!(progress.progress, 0.0);
    for stage in Stage::ALL {
        assert_eq!(progress.stage(stage).map(|s| s.total), Some(3));
    }

    let handler = FnHandler::shared(|_job: &Job| {
        Box::pin(async move { Ok::<JobResult, String>(JobResult::new("extracted")) })
    });
    h.queue
        .consume(Stage::Resume.queue_name(), 3, handler, Arc::new(OpenGate))
        .await?;

    let progress = wait_for_progress(&h.orchestrator, batch.id, |p| {
        p.stage(Stage::Resume).is_some_and(|s| s.completed == 3)
    })
    .await?;

    let resume = progress.stage(Stage::Resume).ok_or("no resume stage")?;
    assert_eq!(resume.progress_percent, 100.0);
    assert!(progress.progress > 0.0 && progress.progress < 100.0);
    assert_eq!(progress.completed_jobs, 3);

    let stored = progress.batch.ok_or("batch record missing")?;
    assert_eq!(stored.processed_candidates, 0);
    assert_eq!(stored.status, BatchStatus::Processing);
    Ok(())
}

#[tokio::test]
async fn test_batch_jobs_carry_priority_and_delay() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let batch = h.orchestrator.submit_batch(ids(1), "jp1").await?;

    for stage in Stage::ALL {
        let jobs = h
            .queue
            .list_jobs(stage.queue_name(), JobFilter::batch(batch.id))
            .await?;
        assert_eq!(jobs.len(), 1, "stage {}", stage);
        let job = &jobs[0];
        assert_eq!(job.priority, stage.priority());
        assert_eq!(job.delay_ms, stage.delay().as_millis() as u64);
        assert_eq!(job.payload.stage(), stage);
        assert_eq!(job.batch_id(), Some(batch.id));
    }

    let github = h
        .queue
        .list_jobs(Stage::GitHub.queue_name(), JobFilter::batch(batch.id))
        .await?;
    let linkedin = h
        .queue
        .list_jobs(Stage::LinkedIn.queue_name(), JobFilter::batch(batch.id))
        .await?;
    assert_eq!(github[0].delay_ms, linkedin[0].delay_ms);
    Ok(())
}

#[tokio::test]
async fn test_single_candidate_starts_at_requested_stage() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    for start in Stage::ALL {
        let candidate_id = format!("single-{}", start);
        let jobs = h
            .orchestrator
            .submit_single_candidate(&candidate_id, "jp1", start.as_str())
            .await?;
        assert_eq!(jobs.len(), start.remaining().len());

        for stage in Stage::ALL {
            let filter = JobFilter {
                candidate_id: Some(candidate_id.clone()),
                ..Default::default()
            };
            let found = h.queue.list_jobs(stage.queue_name(), filter).await?;
            let expected = usize::from(stage >= start);
            assert_eq!(found.len(), expected, "start {} stage {}", start, stage);
        }

        assert_eq!(jobs[0].payload.stage(), start);
        assert_eq!(jobs[0].delay_ms, 0);
        assert_eq!(jobs[0].state(), JobState::Waiting);
    }
    Ok(())
}

#[tokio::test]
async fn test_single_candidate_rebases_delays() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let jobs = h
        .orchestrator
        .submit_single_candidate("c1", "jp1", "interview")
        .await?;

    let delays: Vec<u64> = jobs.iter().map(|j| j.delay_ms).collect();
    assert_eq!(delays, vec![0, 30_000]);
    Ok(())
}

#[tokio::test]
async fn test_invalid_start_stage_enqueues_nothing() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let result = h
        .orchestrator
        .submit_single_candidate("c1", "jp1", "transcript")
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidStage(_))));

    let stats = h.orchestrator.queue_stats().await?;
    assert!(stats.values().all(|s| s.total() == 0));
    Ok(())
}

#[tokio::test]
async fn test_retry_refused_at_maximum() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    h.db.stage_retries().set("c1", Stage::GitHub, 2).await?;

    let result = h.orchestrator.retry_stage("c1", "jp1", "github").await;
    match result {
        Err(e @ PipelineError::MaxRetriesReached { .. }) => {
            assert!(e.to_string().contains("maximum retry attempts reached"));
        }
        other => return Err(format!("unexpected result: {:?}", other).into()),
    }

    let stats = h.queue.stats(Stage::GitHub.queue_name()).await?;
    assert_eq!(stats.total(), 0);
    assert_eq!(h.db.stage_retries().count("c1", Stage::GitHub).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_retry_counts_against_budget() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let job = h.orchestrator.retry_stage("c1", "jp1", "ai-analysis").await?;
    assert_eq!(job.priority, Priority::URGENT);
    assert_eq!(job.queue, Stage::AiAnalysis.queue_name());
    assert_eq!(job.delay_ms, 0);

    h.orchestrator.retry_stage("c1", "jp1", "ai-analysis").await?;
    let third = h.orchestrator.retry_stage("c1", "jp1", "ai-analysis").await;
    assert!(matches!(third, Err(PipelineError::MaxRetriesReached { max: 2, .. })));

    let stats = h.queue.stats(Stage::AiAnalysis.queue_name()).await?;
    assert_eq!(stats.total(), 2);

    assert!(matches!(
        h.orchestrator.retry_stage("c1", "jp1", "phone-screen").await,
        Err(PipelineError::InvalidStage(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_batch_refused_by_admission() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let limit = h.admission.limits().max_batch_size;

    let result = h.orchestrator.submit_batch(ids(limit + 1), "jp1").await;
    assert!(matches!(
        result,
        Err(PipelineError::Admission(AdmissionError::BatchTooLarge { .. }))
    ));

    h.sampler.set_percentage(88.0);
    h.admission.sample_now().await;
    let result = h.orchestrator.submit_batch(ids(2), "jp1").await;
    assert!(matches!(
        result,
        Err(PipelineError::Admission(AdmissionError::MemoryCritical { .. }))
    ));

    let stats = h.orchestrator.queue_stats().await?;
    assert!(stats.values().all(|s| s.total() == 0));
    Ok(())
}

#[tokio::test]
async fn test_single_and_retry_refused_at_critical_memory() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    h.sampler.set_percentage(88.0);
    h.admission.sample_now().await;

    assert!(matches!(
        h.orchestrator
            .submit_single_candidate("c1", "jp1", "resume")
            .await,
        Err(PipelineError::Admission(AdmissionError::MemoryCritical { .. }))
    ));
    assert!(matches!(
        h.orchestrator.retry_stage("c1", "jp1", "github").await,
        Err(PipelineError::Admission(AdmissionError::MemoryCritical { .. }))
    ));

    let stats = h.orchestrator.queue_stats().await?;
    assert!(stats.values().all(|s| s.total() == 0));
    assert_eq!(h.db.stage_retries().count("c1", Stage::GitHub).await?, 0);

    h.sampler.set_percentage(40.0);
    h.admission.sample_now().await;
    h.orchestrator.retry_stage("c1", "jp1", "github").await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_retries_share_one_budget() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orchestrator = h.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.retry_stage("c1", "jp1", "interview").await
        }));
    }

    let mut accepted = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => accepted += 1,
            Err(PipelineError::MaxRetriesReached { .. }) => refused += 1,
            Err(e) => return Err(e.into()),
        }
    }
    assert_eq!((accepted, refused), (2, 2));

    let stats = h.queue.stats(Stage::Interview.queue_name()).await?;
    assert_eq!(stats.total(), 2);
    assert_eq!(h.db.stage_retries().count("c1", Stage::Interview).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_malformed_submissions() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    assert!(matches!(
        h.orchestrator.submit_batch(Vec::new(), "jp1").await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.orchestrator.submit_batch(ids(2), "  ").await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.orchestrator
            .submit_batch(vec!["a".into(), String::new()], "jp1")
            .await,
        Err(PipelineError::InvalidRequest(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_repeated_candidate_is_rejected() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let result = h
        .orchestrator
        .submit_batch(vec!["a".into(), "b".into(), "a".into()], "jp1")
        .await;
    match result {
        Err(PipelineError::InvalidRequest(message)) => {
            assert!(message.contains("candidate a is listed more than once"))
        }
        other => return Err(format!("unexpected result: {:?}", other).into()),
    }

    let stats = h.orchestrator.queue_stats().await?;
    assert!(stats.values().all(|s| s.total() == 0));
    Ok(())
}

#[tokio::test]
async fn test_unknown_batch_progress() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let missing = pipeline_core::BatchId::new();

    assert!(matches!(
        h.orchestrator.batch_progress(missing).await,
        Err(PipelineError::BatchNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.get_batch(missing).await,
        Err(PipelineError::BatchNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_cancel_batch_removes_pending_jobs() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let batch = h.orchestrator.submit_batch(ids(2), "jp1").await?;

    let cancellation = h.orchestrator.cancel_batch(batch.id).await?;
    assert_eq!(cancellation.removed_jobs, 12);
    assert_eq!(cancellation.batch.status, BatchStatus::Failed);

    let stored = h.orchestrator.get_batch(batch.id).await?;
    assert_eq!(stored.status, BatchStatus::Failed);

    let stats = h.orchestrator.queue_stats().await?;
    assert!(stats.values().all(|s| s.backlog() == 0));
    Ok(())
}

#[tokio::test]
async fn test_fan_out_over_stage_queues() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;

    let paused = h.orchestrator.pause_all().await;
    assert_eq!(paused.len(), 6);
    assert!(paused.iter().all(|o| o.is_ok()));
    for stage in Stage::ALL {
        let info = h.queue.queue_info(stage.queue_name()).await?;
        assert_eq!(info.state, QueueState::Paused);
    }

    let resumed = h.orchestrator.resume_all().await;
    assert!(resumed.iter().all(|o| o.is_ok()));
    let info = h.queue.queue_info(Stage::Scoring.queue_name()).await?;
    assert_eq!(info.state, QueueState::Running);

    let retried = h.orchestrator.retry_all_failed().await;
    assert_eq!(retried.iter().map(|o| o.affected).sum::<u64>(), 0);

    let cleaned = h.orchestrator.cleanup(Duration::ZERO).await;
    assert!(cleaned.iter().all(|o| o.is_ok()));
    Ok(())
}

#[tokio::test]
async fn test_fan_out_continues_past_missing_queue() -> Result<(), Box<dyn Error>> {
    let db = db::init(&db::DbConfig::memory()).await?;
    let queue = actors::JobQueue::start(db.clone()).await?;
    let sampler = Arc::new(admission::ManualSampler::new(16 * common::GIB));
    let controller =
        admission::AdmissionController::new(admission::AdmissionConfig::default(), sampler);
    let orchestrator = pipeline::Orchestrator::new(queue.clone(), db, controller);

    // Only the resume queue exists.
    queue
        .create_queue(Stage::Resume.queue_name(), common::fast_queue_config())
        .await?;

    let outcomes = orchestrator.pause_all().await;
    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].error.is_some());
    Ok(())
}

#[tokio::test]
async fn test_failed_submission_leaves_no_jobs_behind() -> Result<(), Box<dyn Error>> {
    let db = db::init(&db::DbConfig::memory()).await?;
    let queue = actors::JobQueue::start(db.clone()).await?;
    let sampler = Arc::new(admission::ManualSampler::new(16 * common::GIB));
    let controller =
        admission::AdmissionController::new(admission::AdmissionConfig::default(), sampler);
    let orchestrator = pipeline::Orchestrator::new(queue.clone(), db.clone(), controller);

    // Only the resume queue exists, so every later stage fails to enqueue.
    queue
        .create_queue(Stage::Resume.queue_name(), common::fast_queue_config())
        .await?;

    let batch = orchestrator.submit_batch(ids(2), "jp1").await;
    assert!(matches!(batch, Err(PipelineError::Queue(_))));
    let single = orchestrator
        .submit_single_candidate("c9", "jp1", "resume")
        .await;
    assert!(matches!(single, Err(PipelineError::Queue(_))));

    let resume = queue.stats(Stage::Resume.queue_name()).await?;
    assert_eq!(resume.total(), 0);

    // A retry that cannot be enqueued does not use up the budget.
    let retry = orchestrator.retry_stage("c9", "jp1", "github").await;
    assert!(matches!(retry, Err(PipelineError::Queue(_))));
    assert_eq!(db.stage_retries().count("c9", Stage::GitHub).await?, 0);
    Ok(())
}
