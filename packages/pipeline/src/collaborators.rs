//! Narrow interfaces to the services the stage handlers rely on.
//!
//! Storage, document parsing and the scoring arithmetic live outside the
//! pipeline. Handlers only see these traits and carry ids through jobs.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pipeline_core::{CandidateRef, Stage};
use providers::ProviderChain;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Future returned by collaborators. Errors are plain messages.
pub type CollaboratorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Contact details found in a resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub raw_text: String,
    pub contact: ContactInfo,
}

/// What the store knows about a candidate when a stage runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateContext {
    #[serde(default)]
    pub resume_text: Option<String>,
    #[serde(default)]
    pub contact: ContactInfo,
    /// Output of earlier stages.
    #[serde(default)]
    pub stage_results: BTreeMap<Stage, Value>,
}

/// Turns an uploaded file into text and contact details.
pub trait DocumentExtractor: Send + Sync + 'static {
    fn extract_text<'a>(&'a self, file: &'a [u8]) -> CollaboratorFuture<'a, ExtractedDocument>;
}

/// Candidate and job-profile persistence.
pub trait CandidateStore: Send + Sync + 'static {
    /// The uploaded resume file.
    fn load_resume<'a>(&'a self, candidate_id: &'a str) -> CollaboratorFuture<'a, Vec<u8>>;

    fn load_context<'a>(
        &'a self,
        candidate: &'a CandidateRef,
    ) -> CollaboratorFuture<'a, CandidateContext>;

    fn save_stage_result<'a>(
        &'a self,
        candidate: &'a CandidateRef,
        stage: Stage,
        result: &'a Value,
    ) -> CollaboratorFuture<'a, ()>;
}

/// Combines the stage results into the final score.
pub trait Scorer: Send + Sync + 'static {
    fn score<'a>(
        &'a self,
        candidate: &'a CandidateRef,
        context: &'a CandidateContext,
    ) -> CollaboratorFuture<'a, Value>;
}

/// Provider chain per external-facing stage.
#[derive(Debug, Clone, Default)]
pub struct StageProviders {
    chains: BTreeMap<Stage, ProviderChain>,
}

impl StageProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage, chain: ProviderChain) -> Self {
        self.chains.insert(stage, chain);
        self
    }

    /// The chain for `stage`. Empty if none was configured.
    pub fn chain(&self, stage: Stage) -> ProviderChain {
        self.chains.get(&stage).cloned().unwrap_or_default()
    }

    pub fn chains(&self) -> impl Iterator<Item = (&Stage, &ProviderChain)> {
        self.chains.iter()
    }
}

/// Everything the stage handlers call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentExtractor>,
    pub candidates: Arc<dyn CandidateStore>,
    pub scorer: Arc<dyn Scorer>,
    pub providers: StageProviders,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
