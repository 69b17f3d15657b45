//! Job handlers for the six stage queues.

use std::sync::Arc;

use actors::{HandlerFuture, HandlerResult, JobHandler};
use admission::AdmissionController;
use pipeline_core::{CandidateRef, Job, JobResult, Stage, StagePayload};
use providers::{AnalysisRequest, FallbackExecutor, ScoredAnalyzer};
use serde_json::{Value, json};

use crate::collaborators::{CandidateContext, Collaborators};

/// Shared by every stage handler.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub collaborators: Collaborators,
    pub executor: FallbackExecutor,
    pub admission: AdmissionController,
}

/// Runs the jobs of one stage queue.
#[derive(Debug, Clone)]
pub struct StageHandler {
    stage: Stage,
    context: Arc<StageContext>,
}

impl StageHandler {
    pub fn new(stage: Stage, context: Arc<StageContext>) -> Self {
        Self { stage, context }
    }

    pub fn shared(stage: Stage, context: Arc<StageContext>) -> Arc<dyn JobHandler> {
        Arc::new(Self::new(stage, context))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl JobHandler for StageHandler {
    fn handle(&self, job: &Job) -> HandlerFuture {
        let stage = self.stage;
        let context = self.context.clone();
        let payload = job.payload.clone();
        let job_id = job.id;

        Box::pin(async move {
            if payload.stage() != stage {
                return Err(format!(
                    "{} job {} delivered to the {} handler",
                    payload.stage(),
                    job_id,
                    stage
                ));
            }
            tracing::debug!(
                job_id = %job_id,
                stage = %stage,
                candidate_id = %payload.candidate().candidate_id,
                "Running stage"
            );
            context.run(payload).await
        })
    }
}

impl StageContext {
    async fn run(&self, payload: StagePayload) -> HandlerResult {
        let candidate = payload.candidate().clone();
        match payload {
            StagePayload::Resume { .. } => self.process_resume(&candidate).await,
            StagePayload::AiAnalysis { .. } => {
                let context = self.load_context(&candidate).await?;
                match context.resume_text {
                    Some(text) => {
                        self.analyze(Stage::AiAnalysis, &candidate, json!({ "resume_text": text }))
                            .await
                    }
                    None => Err("no extracted resume text for candidate".to_string()),
                }
            }
            StagePayload::LinkedIn { profile_url, .. } => {
                let context = self.load_context(&candidate).await?;
                match profile_url.or(context.contact.linkedin_url) {
                    Some(url) => {
                        self.analyze(Stage::LinkedIn, &candidate, json!({ "profile_url": url }))
                            .await
                    }
                    None => self.skip(Stage::LinkedIn, &candidate, "no LinkedIn profile").await,
                }
            }
            StagePayload::GitHub { username, .. } => {
                let context = self.load_context(&candidate).await?;
                match username.or(context.contact.github_username) {
                    Some(username) => {
                        self.analyze(Stage::GitHub, &candidate, json!({ "username": username }))
                            .await
                    }
                    None => self.skip(Stage::GitHub, &candidate, "no GitHub username").await,
                }
            }
            StagePayload::Interview { phone_number, .. } => {
                let context = self.load_context(&candidate).await?;
                match phone_number.or(context.contact.phone) {
                    Some(phone) => {
                        self.analyze(Stage::Interview, &candidate, json!({ "phone_number": phone }))
                            .await
                    }
                    None => self.skip(Stage::Interview, &candidate, "no phone number").await,
                }
            }
            StagePayload::Scoring { .. } => self.score(&candidate).await,
        }
    }

    async fn load_context(&self, candidate: &CandidateRef) -> Result<CandidateContext, String> {
        self.collaborators
            .candidates
            .load_context(candidate)
            .await
            .map_err(|e| format!("failed to load candidate {}: {}", candidate.candidate_id, e))
    }

    async fn save(&self, candidate: &CandidateRef, stage: Stage, result: &Value) -> Result<(), String> {
        self.collaborators
            .candidates
            .save_stage_result(candidate, stage, result)
            .await
            .map_err(|e| format!("failed to store {} result: {}", stage, e))
    }

    async fn process_resume(&self, candidate: &CandidateRef) -> HandlerResult {
        let file = self
            .collaborators
            .candidates
            .load_resume(&candidate.candidate_id)
            .await
            .map_err(|e| format!("failed to load resume: {}", e))?;
        self.admission
            .check_file(file.len() as u64)
            .map_err(|e| e.to_string())?;

        let document = self
            .collaborators
            .documents
            .extract_text(&file)
            .await
            .map_err(|e| format!("text extraction failed: {}", e))?;

        let output = serde_json::to_value(&document).map_err(|e| e.to_string())?;
        self.save(candidate, Stage::Resume, &output).await?;

        Ok(JobResult::with_output(
            format!("Extracted {} characters", document.raw_text.chars().count()),
            output,
        ))
    }

    async fn analyze(&self, stage: Stage, candidate: &CandidateRef, context: Value) -> HandlerResult {
        let analyzer = ScoredAnalyzer::for_stage(stage);
        let request = AnalysisRequest {
            candidate_id: candidate.candidate_id.clone(),
            job_profile_id: candidate.job_profile_id.clone(),
            stage,
            context,
        };

        let result = self
            .executor
            .execute_analysis(
                &analyzer,
                &candidate.candidate_id,
                &request,
                &self.collaborators.providers.chain(stage),
            )
            .await
            .map_err(|e| e.to_string())?;

        let output = serde_json::to_value(&result).map_err(|e| e.to_string())?;
        self.save(candidate, stage, &output).await?;

        let summary = if result.degraded {
            format!("{} degraded: {}", stage, result.summary)
        } else {
            format!("{} scored {:.1}", stage, result.score)
        };
        Ok(JobResult::with_output(summary, output))
    }

    async fn skip(&self, stage: Stage, candidate: &CandidateRef, reason: &str) -> HandlerResult {
        tracing::info!(
            candidate_id = %candidate.candidate_id,
            stage = %stage,
            "Skipping stage: {}",
            reason
        );
        let output = json!({ "skipped": true, "reason": reason });
        self.save(candidate, stage, &output).await?;
        Ok(JobResult::with_output(format!("{} skipped: {}", stage, reason), output))
    }

    async fn score(&self, candidate: &CandidateRef) -> HandlerResult {
        let context = self.load_context(candidate).await?;
        let output = self
            .collaborators
            .scorer
            .score(candidate, &context)
            .await
            .map_err(|e| format!("scoring failed: {}", e))?;
        self.save(candidate, Stage::Scoring, &output).await?;
        Ok(JobResult::with_output("Candidate scored", output))
    }
}
