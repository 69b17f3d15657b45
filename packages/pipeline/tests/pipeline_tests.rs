#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use admission::ManualSampler;
use common::{CannedProvider, GIB, MemoryStore, collaborators, fast_queue_config};
use monitor::{AlertConfig, RecoveryAction, Severity};
use pipeline::{CandidateContext, Pipeline, PipelineConfig, StageProviders};
use pipeline_core::Stage;
use providers::{ProviderChain, ProviderConfig};
use serde_json::json;

async fn start(store: Arc<MemoryStore>) -> Result<(Pipeline, Arc<ManualSampler>), Box<dyn Error>> {
    let provider = CannedProvider::new(json!({"score": 75.0, "confidence": 0.8}));
    let providers = StageProviders::new().with(
        Stage::AiAnalysis,
        ProviderChain::new().with(ProviderConfig::new("canned"), provider),
    );
    let config = PipelineConfig::default()
        .with_queue(fast_queue_config())
        .with_alerts(AlertConfig::default().with_interval(Duration::from_secs(3600)));
    let sampler = Arc::new(ManualSampler::new(16 * GIB));
    let pipeline =
        Pipeline::start_with_sampler(config, collaborators(store, providers), sampler.clone())
            .await?;
    Ok((pipeline, sampler))
}

#[tokio::test]
async fn test_start_creates_stage_queues() -> Result<(), Box<dyn Error>> {
    let (pipeline, _) = start(MemoryStore::new()).await?;

    let names = pipeline.queue().queue_names().await?;
    for stage in Stage::ALL {
        assert!(names.iter().any(|n| n == stage.queue_name()), "missing {}", stage);
    }

    let status = pipeline.recorder().recovery_status();
    assert_eq!(status.strategies.len(), 4);

    let outcomes = pipeline.shutdown().await?;
    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert!(names.contains(&"archive-finished-jobs"));
    assert!(names.contains(&"prune-failure-patterns"));
    assert!(outcomes.iter().all(|o| o.error.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_submitted_candidate_is_scored() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let mut context = CandidateContext::default();
    context
        .stage_results
        .insert(Stage::AiAnalysis, json!({"score": 90.0}));
    store.set_context("c1", context);
    let (pipeline, _) = start(store.clone()).await?;

    pipeline
        .orchestrator()
        .submit_single_candidate("c1", "jp1", "scoring")
        .await?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.result("c1", Stage::Scoring).is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let scored = store.result("c1", Stage::Scoring).ok_or("candidate never scored")?;
    assert_eq!(scored["overall"], 90.0);

    let deadline = Instant::now() + Duration::from_secs(2);
    while pipeline.job_events().completed() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(pipeline.job_events().completed(), 1);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_memory_pressure_raises_alerts_and_sheds_load() -> Result<(), Box<dyn Error>> {
    let (pipeline, sampler) = start(MemoryStore::new()).await?;

    sampler.set_percentage(88.0);
    pipeline.admission().sample_now().await;
    assert!(pipeline.memory_report().current.is_some());

    let fired = pipeline.alerts().evaluate().await;
    let critical = fired
        .iter()
        .find(|n| n.rule_id == "memory_critical")
        .ok_or("memory_critical did not fire")?;
    assert_eq!(critical.severity, Severity::Critical);
    assert!(fired.iter().any(|n| n.rule_id == "memory_warning"));

    let attempts = pipeline.recorder().recovery_status().recent_attempts;
    let shed = attempts
        .iter()
        .find(|a| a.action == RecoveryAction::ShedLoad)
        .ok_or("no load shedding attempt")?;
    assert!(shed.succeeded);
    assert_eq!(shed.service, "alert:memory_critical");

    // Cooldown suppresses an immediate repeat.
    let repeat = pipeline.alerts().evaluate().await;
    assert!(repeat.iter().all(|n| n.rule_id != "memory_critical"));

    pipeline.shutdown().await?;
    Ok(())
}
