#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actors::FnHandler;
use common::{CannedProvider, setup};
use monitor::{RecoveryAction, RecoveryContext, RecoveryStrategy};
use pipeline::StageProviders;
use pipeline::recovery::{LoadShedding, ProviderRotation, QueueDrain, StoreReconnect};
use pipeline_core::{CandidateRef, EnqueueOptions, Job, JobResult, OpenGate, Priority, Stage, StagePayload};
use providers::{ProviderChain, ProviderConfig};
use serde_json::json;

fn context(action: RecoveryAction, service: &str, operation: Option<&str>) -> RecoveryContext {
    RecoveryContext {
        action,
        service: service.to_string(),
        operation: operation.map(str::to_string),
        error_kind: None,
        reason: "test".to_string(),
    }
}

#[tokio::test]
async fn test_rotation_demotes_provider_in_every_chain() -> Result<(), Box<dyn Error>> {
    let chain = |first: &str| {
        ProviderChain::new()
            .with(ProviderConfig::new(first), CannedProvider::new(json!({})))
            .with(ProviderConfig::new("backup"), CannedProvider::new(json!({})))
    };
    let providers = StageProviders::new()
        .with(Stage::AiAnalysis, chain("openai"))
        .with(Stage::GitHub, chain("openai"))
        .with(Stage::LinkedIn, chain("scraper"));
    let rotation = ProviderRotation::new(providers.clone());

    rotation
        .recover(&context(RecoveryAction::RotateProvider, "openai", None))
        .await?;
    assert_eq!(providers.chain(Stage::AiAnalysis).names(), vec!["backup", "openai"]);
    assert_eq!(providers.chain(Stage::GitHub).names(), vec!["backup", "openai"]);
    assert_eq!(providers.chain(Stage::LinkedIn).names(), vec!["scraper", "backup"]);

    let unknown = rotation
        .recover(&context(RecoveryAction::RotateProvider, "anthropic", None))
        .await;
    assert!(unknown.is_err());
    Ok(())
}

#[tokio::test]
async fn test_drain_requeues_failed_jobs() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let queue = Stage::GitHub.queue_name();

    h.queue
        .enqueue(
            queue,
            StagePayload::for_stage(Stage::GitHub, CandidateRef::new("c1", "jp1")),
            EnqueueOptions::new(Priority::NORMAL).with_max_attempts(1),
        )
        .await?;
    let handler = FnHandler::shared(|_job: &Job| {
        Box::pin(async move { Err::<JobResult, String>("rate limited".to_string()) })
    });
    h.queue.consume(queue, 1, handler, Arc::new(OpenGate)).await?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.queue.stats(queue).await?.failed == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    h.queue.pause(queue).await?;
    assert_eq!(h.queue.stats(queue).await?.failed, 1);

    let drain = QueueDrain::new(h.queue.clone());
    drain
        .recover(&context(RecoveryAction::DrainQueueBacklog, "queue", Some(queue)))
        .await?;

    let stats = h.queue.stats(queue).await?;
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.backlog(), 1);
    Ok(())
}

#[tokio::test]
async fn test_load_shedding_reports_failed_callbacks() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    let shedding = LoadShedding::new(h.admission.clone());

    h.admission.register_cleanup("flush", || Box::pin(async { Ok::<(), String>(()) }));
    shedding
        .recover(&context(RecoveryAction::ShedLoad, "memory", None))
        .await?;

    h.admission
        .register_cleanup("broken", || Box::pin(async { Err::<(), String>("disk full".into()) }));
    let error = shedding
        .recover(&context(RecoveryAction::ShedLoad, "memory", None))
        .await
        .err()
        .ok_or("expected failure")?;
    assert!(error.contains("broken: disk full"));
    Ok(())
}

#[tokio::test]
async fn test_reconnect_probes_store() -> Result<(), Box<dyn Error>> {
    let h = setup().await?;
    StoreReconnect::new(h.db.clone())
        .recover(&context(RecoveryAction::Reconnect, "database", None))
        .await?;
    Ok(())
}
