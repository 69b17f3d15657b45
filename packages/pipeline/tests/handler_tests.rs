#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::JobHandler;
use admission::{AdmissionConfig, AdmissionController, ManualSampler};
use common::{CannedProvider, GIB, MemoryStore, collaborators};
use monitor::{ApiCounters, FailurePatternRecorder};
use pipeline::{CandidateContext, ContactInfo, StageContext, StageHandler, StageProviders};
use pipeline_core::{CandidateRef, EnqueueOptions, Job, Stage, StagePayload};
use providers::{FallbackExecutor, ProviderChain, ProviderConfig};
use serde_json::json;

fn context(store: Arc<MemoryStore>, providers: StageProviders, admission: AdmissionConfig) -> Arc<StageContext> {
    let executor = FallbackExecutor::new(FailurePatternRecorder::default(), Arc::new(ApiCounters::new()))
        .with_backoff_base(Duration::from_millis(1));
    Arc::new(StageContext {
        collaborators: collaborators(store, providers),
        executor,
        admission: AdmissionController::new(admission, Arc::new(ManualSampler::new(16 * GIB))),
    })
}

fn job(stage: Stage, candidate_id: &str) -> Job {
    Job::new(
        stage.queue_name(),
        StagePayload::for_stage(stage, CandidateRef::new(candidate_id, "jp1")),
        &EnqueueOptions::default(),
    )
}

fn chain(provider: Arc<CannedProvider>) -> ProviderChain {
    ProviderChain::new().with(ProviderConfig::new("primary").with_max_retries(1), provider)
}

#[tokio::test]
async fn test_resume_stage_extracts_contact_details() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    store.add_resume("c1", "Jane Doe\nphone: +1 555 0100\ngithub: janedoe\nemail: jane@example.com");
    let handler = StageHandler::new(
        Stage::Resume,
        context(store.clone(), StageProviders::new(), AdmissionConfig::default()),
    );

    let result = handler.handle(&job(Stage::Resume, "c1")).await?;
    assert!(result.summary.starts_with("Extracted"));

    let stored = store.context("c1");
    assert_eq!(stored.contact.github_username.as_deref(), Some("janedoe"));
    assert_eq!(stored.contact.phone.as_deref(), Some("+1 555 0100"));
    assert!(stored.resume_text.is_some_and(|t| t.contains("Jane Doe")));
    Ok(())
}

#[tokio::test]
async fn test_resume_over_file_limit_fails() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    store.add_resume("c1", &"x".repeat(64));
    let handler = StageHandler::new(
        Stage::Resume,
        context(
            store.clone(),
            StageProviders::new(),
            AdmissionConfig::default().with_max_file_size(16),
        ),
    );

    let result = handler.handle(&job(Stage::Resume, "c1")).await;
    assert!(result.is_err());
    assert!(store.result("c1", Stage::Resume).is_none());
    Ok(())
}

#[tokio::test]
async fn test_analysis_stage_calls_provider_chain() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    store.set_context(
        "c1",
        CandidateContext {
            resume_text: Some("Rust, distributed systems".into()),
            ..Default::default()
        },
    );
    let provider = CannedProvider::new(json!({
        "score": 81.0,
        "confidence": 0.7,
        "summary": "good fit",
    }));
    let providers = StageProviders::new().with(Stage::AiAnalysis, chain(provider.clone()));
    let handler = StageHandler::new(
        Stage::AiAnalysis,
        context(store.clone(), providers, AdmissionConfig::default()),
    );

    let result = handler.handle(&job(Stage::AiAnalysis, "c1")).await?;
    assert_eq!(provider.calls(), 1);
    assert_eq!(result.output.as_ref().and_then(|o| o["score"].as_f64()), Some(81.0));

    let stored = store.result("c1", Stage::AiAnalysis).ok_or("result not stored")?;
    assert_eq!(stored["summary"], "good fit");
    Ok(())
}

#[tokio::test]
async fn test_invalid_provider_answer_degrades() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    store.set_context(
        "c1",
        CandidateContext {
            contact: ContactInfo {
                github_username: Some("janedoe".into()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let provider = CannedProvider::new(json!({"status": "ok"}));
    let providers = StageProviders::new().with(Stage::GitHub, chain(provider));
    let handler = StageHandler::new(
        Stage::GitHub,
        context(store.clone(), providers, AdmissionConfig::default()),
    );

    let result = handler.handle(&job(Stage::GitHub, "c1")).await?;
    assert!(result.summary.contains("degraded"));

    let stored = store.result("c1", Stage::GitHub).ok_or("result not stored")?;
    assert_eq!(stored["degraded"], true);
    assert_eq!(stored["confidence"], 0.0);
    Ok(())
}

#[tokio::test]
async fn test_missing_profile_skips_provider() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let provider = CannedProvider::new(json!({"score": 50.0, "confidence": 0.5}));
    let providers = StageProviders::new().with(Stage::LinkedIn, chain(provider.clone()));
    let handler = StageHandler::new(
        Stage::LinkedIn,
        context(store.clone(), providers, AdmissionConfig::default()),
    );

    let result = handler.handle(&job(Stage::LinkedIn, "c1")).await?;
    assert!(result.summary.contains("skipped"));
    assert_eq!(provider.calls(), 0);
    assert_eq!(
        store.result("c1", Stage::LinkedIn).map(|v| v["skipped"].clone()),
        Some(json!(true))
    );
    Ok(())
}

#[tokio::test]
async fn test_payload_hint_wins_over_stored_contact() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let provider = CannedProvider::new(json!({"score": 60.0, "confidence": 0.9}));
    let providers = StageProviders::new().with(Stage::Interview, chain(provider.clone()));
    let handler = StageHandler::new(
        Stage::Interview,
        context(store, providers, AdmissionConfig::default()),
    );

    let interview = Job::new(
        Stage::Interview.queue_name(),
        StagePayload::Interview {
            candidate: CandidateRef::new("c1", "jp1"),
            phone_number: Some("+1 555 0199".into()),
        },
        &EnqueueOptions::default(),
    );
    handler.handle(&interview).await?;
    assert_eq!(provider.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stage_without_providers_fails_job() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    store.set_context(
        "c1",
        CandidateContext {
            resume_text: Some("text".into()),
            ..Default::default()
        },
    );
    let handler = StageHandler::new(
        Stage::AiAnalysis,
        context(store, StageProviders::new(), AdmissionConfig::default()),
    );

    let error = handler
        .handle(&job(Stage::AiAnalysis, "c1"))
        .await
        .err()
        .ok_or("expected failure")?;
    assert!(error.contains("no providers"));
    Ok(())
}

#[tokio::test]
async fn test_job_for_another_stage_is_rejected() -> Result<(), Box<dyn Error>> {
    let handler = StageHandler::new(
        Stage::Scoring,
        context(MemoryStore::new(), StageProviders::new(), AdmissionConfig::default()),
    );
    assert!(handler.handle(&job(Stage::Resume, "c1")).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_scoring_uses_stage_results() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let mut context_data = CandidateContext::default();
    context_data
        .stage_results
        .insert(Stage::AiAnalysis, json!({"score": 80.0}));
    context_data
        .stage_results
        .insert(Stage::GitHub, json!({"score": 60.0}));
    store.set_context("c1", context_data);

    let handler = StageHandler::new(
        Stage::Scoring,
        context(store.clone(), StageProviders::new(), AdmissionConfig::default()),
    );
    handler.handle(&job(Stage::Scoring, "c1")).await?;

    let scored = store.result("c1", Stage::Scoring).ok_or("score not stored")?;
    assert_eq!(scored["overall"], 70.0);
    Ok(())
}
