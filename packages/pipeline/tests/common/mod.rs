#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actors::JobQueue;
use admission::{AdmissionConfig, AdmissionController, ManualSampler};
use db::{Database, DbConfig};
use pipeline::{
    CandidateContext, CandidateStore, CollaboratorFuture, Collaborators, ContactInfo,
    DocumentExtractor, ExtractedDocument, Orchestrator, PipelineError, Scorer, StageProviders,
};
use pipeline_core::{BackoffPolicy, BatchId, BatchProgress, CandidateRef, QueueConfig, Stage};
use providers::{Provider, ProviderFuture};
use serde_json::{Value, json};

pub const GIB: u64 = 1024 * 1024 * 1024;

pub struct Harness {
    pub db: Database,
    pub queue: JobQueue,
    pub sampler: Arc<ManualSampler>,
    pub admission: AdmissionController,
    pub orchestrator: Orchestrator,
}

/// Queue settings with short intervals so tests settle quickly.
pub fn fast_queue_config() -> QueueConfig {
    let mut config = QueueConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_backoff(BackoffPolicy::exponential(Duration::from_millis(20)));
    config.tick_interval_ms = 50;
    config
}

/// Orchestrator over a fresh in-memory store, with a 16 GiB simulated host.
pub async fn setup() -> Result<Harness, Box<dyn std::error::Error>> {
    let db = db::init(&DbConfig::memory()).await?;
    let queue = JobQueue::start(db.clone()).await?;
    let sampler = Arc::new(ManualSampler::new(16 * GIB));
    let admission = AdmissionController::new(AdmissionConfig::default(), sampler.clone());
    let orchestrator = Orchestrator::new(queue.clone(), db.clone(), admission.clone());
    orchestrator.ensure_stage_queues(&fast_queue_config()).await?;

    Ok(Harness {
        db,
        queue,
        sampler,
        admission,
        orchestrator,
    })
}

/// Poll progress until `done` holds or five seconds pass.
pub async fn wait_for_progress<F>(
    orchestrator: &Orchestrator,
    batch_id: BatchId,
    done: F,
) -> Result<BatchProgress, PipelineError>
where
    F: Fn(&BatchProgress) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let progress = orchestrator.batch_progress(batch_id).await?;
        if done(&progress) || Instant::now() > deadline {
            return Ok(progress);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Candidate store kept in memory. A stored resume stage result fills in
/// the resume text and contact details.
#[derive(Default)]
pub struct MemoryStore {
    resumes: Mutex<HashMap<String, Vec<u8>>>,
    contexts: Mutex<HashMap<String, CandidateContext>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_resume(&self, candidate_id: &str, text: &str) {
        self.resumes
            .lock()
            .unwrap()
            .insert(candidate_id.to_string(), text.as_bytes().to_vec());
    }

    pub fn set_context(&self, candidate_id: &str, context: CandidateContext) {
        self.contexts
            .lock()
            .unwrap()
            .insert(candidate_id.to_string(), context);
    }

    pub fn context(&self, candidate_id: &str) -> CandidateContext {
        self.contexts
            .lock()
            .unwrap()
            .get(candidate_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn result(&self, candidate_id: &str, stage: Stage) -> Option<Value> {
        self.context(candidate_id).stage_results.get(&stage).cloned()
    }
}

impl CandidateStore for MemoryStore {
    fn load_resume<'a>(&'a self, candidate_id: &'a str) -> CollaboratorFuture<'a, Vec<u8>> {
        let file = self.resumes.lock().unwrap().get(candidate_id).cloned();
        Box::pin(async move { file.ok_or_else(|| format!("no resume for {}", candidate_id)) })
    }

    fn load_context<'a>(
        &'a self,
        candidate: &'a CandidateRef,
    ) -> CollaboratorFuture<'a, CandidateContext> {
        let context = self.context(&candidate.candidate_id);
        Box::pin(async move { Ok(context) })
    }

    fn save_stage_result<'a>(
        &'a self,
        candidate: &'a CandidateRef,
        stage: Stage,
        result: &'a Value,
    ) -> CollaboratorFuture<'a, ()> {
        let mut contexts = self.contexts.lock().unwrap();
        let context = contexts.entry(candidate.candidate_id.clone()).or_default();
        if stage == Stage::Resume {
            if let Ok(document) = serde_json::from_value::<ExtractedDocument>(result.clone()) {
                context.resume_text = Some(document.raw_text);
                context.contact = document.contact;
            }
        }
        context.stage_results.insert(stage, result.clone());
        Box::pin(async move { Ok(()) })
    }
}

/// Reads `key: value` lines for contact details.
pub struct LineExtractor;

impl DocumentExtractor for LineExtractor {
    fn extract_text<'a>(&'a self, file: &'a [u8]) -> CollaboratorFuture<'a, ExtractedDocument> {
        Box::pin(async move {
            let raw_text = String::from_utf8(file.to_vec()).map_err(|e| e.to_string())?;
            let mut contact = ContactInfo::default();
            for line in raw_text.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    let value = Some(value.trim().to_string());
                    match key.trim() {
                        "email" => contact.email = value,
                        "phone" => contact.phone = value,
                        "linkedin" => contact.linkedin_url = value,
                        "github" => contact.github_username = value,
                        _ => {}
                    }
                }
            }
            Ok(ExtractedDocument { raw_text, contact })
        })
    }
}

/// Averages the scores of the analysed stages.
pub struct AverageScorer;

impl Scorer for AverageScorer {
    fn score<'a>(
        &'a self,
        _candidate: &'a CandidateRef,
        context: &'a CandidateContext,
    ) -> CollaboratorFuture<'a, Value> {
        let scores: Vec<f64> = context
            .stage_results
            .values()
            .filter_map(|v| v.get("score").and_then(Value::as_f64))
            .collect();
        let overall = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Box::pin(async move { Ok(json!({ "overall": overall, "stages": scores.len() })) })
    }
}

/// Provider answering with a fixed value and counting calls.
pub struct CannedProvider {
    response: Value,
    calls: AtomicU32,
}

impl CannedProvider {
    pub fn new(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for CannedProvider {
    fn call<'a>(&'a self, _request: &'a Value) -> ProviderFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.response.clone();
        Box::pin(async move { Ok(response) })
    }
}

pub fn collaborators(store: Arc<MemoryStore>, providers: StageProviders) -> Collaborators {
    Collaborators {
        documents: Arc::new(LineExtractor),
        candidates: store,
        scorer: Arc::new(AverageScorer),
        providers,
    }
}
