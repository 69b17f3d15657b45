#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{FnHandler, HandlerResult, JobFilter, JobHandler};
use chrono::Utc;
use common::{QUEUE, fast_config, payload, setup_queue, wait_for_stats};
use pipeline_core::{
    AdmissionGate, EnqueueOptions, Job, JobEvent, JobResult, JobState, JobStatus, OpenGate,
    Priority, QueueState,
};

fn succeed() -> Arc<dyn JobHandler> {
    FnHandler::shared(|job: &Job| {
        let candidate = job.candidate_id().to_string();
        Box::pin(async move { Ok(JobResult::new(format!("processed {}", candidate))) })
    })
}

fn always_fail() -> Arc<dyn JobHandler> {
    FnHandler::shared(|_job: &Job| {
        Box::pin(async move { Err::<JobResult, _>("upstream unavailable".to_string()) })
    })
}

fn open_gate() -> Arc<dyn AdmissionGate> {
    Arc::new(OpenGate)
}

async fn explode() -> HandlerResult {
    panic!("boom")
}

struct ClosedGate;

impl AdmissionGate for ClosedGate {
    fn can_admit(&self) -> bool {
        false
    }

    fn try_admit(&self, _job_id: &str) -> bool {
        false
    }

    fn release(&self, _job_id: &str) {}
}

#[tokio::test]
async fn test_jobs_complete() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    let mut events = queue.subscribe();
    queue.create_queue(QUEUE, fast_config()).await?;

    for candidate in ["c1", "c2", "c3"] {
        queue
            .enqueue(QUEUE, payload(candidate), EnqueueOptions::default())
            .await?;
    }
    assert_eq!(queue.stats(QUEUE).await?.waiting, 3);

    queue.consume(QUEUE, 2, succeed(), open_gate()).await?;

    let stats = wait_for_stats(&queue, QUEUE, |s| s.completed == 3).await?;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.backlog(), 0);
    assert_eq!(stats.success_rate(), Some(100.0));

    let completed = queue
        .list_jobs(QUEUE, JobFilter::state(JobState::Completed))
        .await?;
    assert!(completed.iter().all(|j| j.attempts_made == 1));
    assert!(completed.iter().any(|j| matches!(
        &j.status,
        JobStatus::Completed { result, .. } if result.summary == "processed c2"
    )));

    let mut completed_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, JobEvent::JobCompleted { .. }) {
            completed_events += 1;
        }
    }
    assert_eq!(completed_events, 3);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_job_retries_with_backoff_then_fails() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    let mut events = queue.subscribe();
    queue
        .create_queue(QUEUE, fast_config().with_max_attempts(3))
        .await?;

    let job = queue
        .enqueue(QUEUE, payload("c1"), EnqueueOptions::default())
        .await?;
    queue.consume(QUEUE, 1, always_fail(), open_gate()).await?;

    let stats = wait_for_stats(&queue, QUEUE, |s| s.failed == 1).await?;
    assert_eq!(stats.failed, 1);

    let failed = queue.get_job(QUEUE, job.id).await?.ok_or("job missing")?;
    assert_eq!(failed.attempts_made, 3);
    assert_eq!(failed.last_error.as_deref(), Some("upstream unavailable"));

    let mut retry_delays = Vec::new();
    let mut final_failure = false;
    while let Ok(event) = events.try_recv() {
        match event {
            JobEvent::JobRetrying { delay_ms, .. } => retry_delays.push(delay_ms),
            JobEvent::JobFailed {
                will_retry: false, ..
            } => final_failure = true,
            _ => {}
        }
    }
    assert_eq!(retry_delays, vec![20, 40]);
    assert!(final_failure);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_delayed_job_waits() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    queue.create_queue(QUEUE, fast_config()).await?;
    queue.consume(QUEUE, 1, succeed(), open_gate()).await?;

    queue
        .enqueue(
            QUEUE,
            payload("c1"),
            EnqueueOptions::default().with_delay(Duration::from_millis(400)),
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let early = queue.stats(QUEUE).await?;
    assert_eq!(early.delayed, 1);
    assert_eq!(early.completed, 0);

    let stats = wait_for_stats(&queue, QUEUE, |s| s.completed == 1).await?;
    assert_eq!(stats.completed, 1);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_higher_priority_runs_first() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    queue.create_queue(QUEUE, fast_config()).await?;

    queue
        .enqueue(QUEUE, payload("low"), EnqueueOptions::new(Priority::LOW))
        .await?;
    queue
        .enqueue(QUEUE, payload("normal"), EnqueueOptions::new(Priority::NORMAL))
        .await?;
    queue
        .enqueue(QUEUE, payload("urgent"), EnqueueOptions::new(Priority::URGENT))
        .await?;

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let handler = FnHandler::shared(move |job: &Job| {
        if let Ok(mut seen) = seen.lock() {
            seen.push(job.candidate_id().to_string());
        }
        Box::pin(async move { Ok(JobResult::new("ok")) })
    });
    queue.consume(QUEUE, 1, handler, open_gate()).await?;

    wait_for_stats(&queue, QUEUE, |s| s.completed == 3).await?;
    let order = order.lock().map_err(|_| "poisoned")?.clone();
    assert_eq!(order, vec!["urgent", "normal", "low"]);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_pause_and_resume() -> Result<(), Box<dyn Error>> {
    let (db, queue) = setup_queue().await?;
    queue.create_queue(QUEUE, fast_config()).await?;
    queue.consume(QUEUE, 1, succeed(), open_gate()).await?;

    queue.pause(QUEUE).await?;
    assert_eq!(queue.queue_info(QUEUE).await?.state, QueueState::Paused);
    assert_eq!(db.queues().get_by_name(QUEUE).await?.state, QueueState::Paused);

    queue
        .enqueue(QUEUE, payload("c1"), EnqueueOptions::default())
        .await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let paused = queue.stats(QUEUE).await?;
    assert_eq!(paused.paused, 1);
    assert_eq!(paused.completed, 0);

    queue.resume(QUEUE).await?;
    let stats = wait_for_stats(&queue, QUEUE, |s| s.completed == 1).await?;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.paused, 0);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_retry_failed_and_clean() -> Result<(), Box<dyn Error>> {
    let (db, queue) = setup_queue().await?;
    queue
        .create_queue(QUEUE, fast_config().with_max_attempts(1))
        .await?;

    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let handler = FnHandler::shared(move |_job: &Job| {
        let ok = flag.load(Ordering::SeqCst);
        Box::pin(async move {
            if ok {
                Ok(JobResult::new("ok"))
            } else {
                Err("down".to_string())
            }
        })
    });

    queue
        .enqueue(QUEUE, payload("c1"), EnqueueOptions::default())
        .await?;
    queue
        .enqueue(QUEUE, payload("c2"), EnqueueOptions::default())
        .await?;
    queue.consume(QUEUE, 1, handler, open_gate()).await?;

    let stats = wait_for_stats(&queue, QUEUE, |s| s.failed == 2).await?;
    assert_eq!(stats.failed, 2);

    healthy.store(true, Ordering::SeqCst);
    assert_eq!(queue.retry_failed(QUEUE).await?, 2);
    let stats = wait_for_stats(&queue, QUEUE, |s| s.completed == 2).await?;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);

    // Nothing is old enough for an hour of grace.
    assert_eq!(queue.clean(QUEUE, Duration::from_secs(3600)).await?, 0);
    assert_eq!(queue.clean(QUEUE, Duration::ZERO).await?, 2);
    assert_eq!(queue.stats(QUEUE).await?.total(), 0);

    let history = db.jobs().history_for_queue(QUEUE).await?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.final_status == "completed"));

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_remove_pending_job() -> Result<(), Box<dyn Error>> {
    let (db, queue) = setup_queue().await?;
    queue.create_queue(QUEUE, fast_config()).await?;

    let job = queue
        .enqueue(
            QUEUE,
            payload("c1"),
            EnqueueOptions::default().with_delay(Duration::from_secs(60)),
        )
        .await?;

    assert!(queue.remove_job(QUEUE, job.id).await?);
    assert!(queue.get_job(QUEUE, job.id).await?.is_none());
    assert!(db.jobs().list_for_queue(QUEUE).await?.is_empty());
    assert!(queue.remove_job(QUEUE, job.id).await.is_err());

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_closed_gate_keeps_jobs_waiting() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    queue.create_queue(QUEUE, fast_config()).await?;
    let job = queue
        .enqueue(QUEUE, payload("c1"), EnqueueOptions::default())
        .await?;

    queue
        .consume(QUEUE, 1, succeed(), Arc::new(ClosedGate))
        .await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = queue.stats(QUEUE).await?;
    assert_eq!(stats.waiting, 1);
    let job = queue.get_job(QUEUE, job.id).await?.ok_or("job missing")?;
    assert_eq!(job.attempts_made, 0);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_fails_job() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    queue
        .create_queue(QUEUE, fast_config().with_max_attempts(1))
        .await?;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler = FnHandler::shared(move |_job: &Job| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(explode())
    });

    let job = queue
        .enqueue(QUEUE, payload("c1"), EnqueueOptions::default())
        .await?;
    queue.consume(QUEUE, 1, handler, open_gate()).await?;

    wait_for_stats(&queue, QUEUE, |s| s.failed == 1).await?;
    let job = queue.get_job(QUEUE, job.id).await?.ok_or("job missing")?;
    assert_eq!(job.last_error.as_deref(), Some("job handler panicked"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The worker survived and keeps serving the queue.
    queue.retry_failed(QUEUE).await?;
    wait_for_stats(&queue, QUEUE, |s| s.failed == 1 && s.waiting == 0).await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_interrupted_jobs_are_recovered_on_start() -> Result<(), Box<dyn Error>> {
    let (db, queue) = setup_queue().await?;
    let mut events = queue.subscribe();

    // A job left active by a previous process.
    let mut job = Job::new(QUEUE, payload("c1"), &EnqueueOptions::default());
    job.attempts_made = 1;
    job.status = JobStatus::Active {
        started_at: Utc::now(),
        worker_id: "gone-worker".into(),
    };
    db.jobs().save(&job).await?;

    queue.create_queue(QUEUE, fast_config()).await?;

    let recovered = queue.get_job(QUEUE, job.id).await?.ok_or("job missing")?;
    assert_eq!(recovered.state(), JobState::Waiting);
    assert_eq!(recovered.stalled_count, 1);
    assert_eq!(recovered.attempts_made, 0);

    let mut stalled = false;
    while let Ok(event) = events.try_recv() {
        if let JobEvent::JobStalled { worker_id, .. } = event {
            stalled = worker_id == "gone-worker";
        }
    }
    assert!(stalled);

    queue.consume(QUEUE, 1, succeed(), open_gate()).await?;
    let stats = wait_for_stats(&queue, QUEUE, |s| s.completed == 1).await?;
    assert_eq!(stats.completed, 1);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_queue() -> Result<(), Box<dyn Error>> {
    let (_db, queue) = setup_queue().await?;
    let result = queue
        .enqueue("missing", payload("c1"), EnqueueOptions::default())
        .await;
    assert!(matches!(result, Err(actors::QueueError::QueueNotFound(_))));
    queue.shutdown().await?;
    Ok(())
}
