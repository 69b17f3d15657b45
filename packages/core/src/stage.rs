//! Pipeline stages and their per-stage job payloads.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BatchId, Priority};

/// One named step of the candidate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Resume,
    AiAnalysis,
    #[serde(rename = "linkedin")]
    LinkedIn,
    #[serde(rename = "github")]
    GitHub,
    Interview,
    Scoring,
}

impl Stage {
    /// The fixed pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Resume,
        Stage::AiAnalysis,
        Stage::LinkedIn,
        Stage::GitHub,
        Stage::Interview,
        Stage::Scoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resume => "resume",
            Stage::AiAnalysis => "ai-analysis",
            Stage::LinkedIn => "linkedin",
            Stage::GitHub => "github",
            Stage::Interview => "interview",
            Stage::Scoring => "scoring",
        }
    }

    /// Name of the job queue that carries this stage's jobs.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::Resume => "resume-processing",
            Stage::AiAnalysis => "ai-analysis",
            Stage::LinkedIn => "linkedin-analysis",
            Stage::GitHub => "github-analysis",
            Stage::Interview => "interview-scheduling",
            Stage::Scoring => "candidate-scoring",
        }
    }

    /// Position in the fixed pipeline order.
    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// Default priority. Earlier stages run ahead of later ones.
    pub fn priority(&self) -> Priority {
        match self {
            Stage::Resume => Priority(60),
            Stage::AiAnalysis => Priority(50),
            Stage::LinkedIn => Priority(40),
            Stage::GitHub => Priority(30),
            Stage::Interview => Priority(20),
            Stage::Scoring => Priority(10),
        }
    }

    /// Delay relative to batch submission. linkedin and github run side by side.
    pub fn delay(&self) -> Duration {
        match self {
            Stage::Resume => Duration::ZERO,
            Stage::AiAnalysis => Duration::from_secs(5),
            Stage::LinkedIn | Stage::GitHub => Duration::from_secs(10),
            Stage::Interview => Duration::from_secs(30),
            Stage::Scoring => Duration::from_secs(60),
        }
    }

    /// Stages at or after `self`, in pipeline order.
    pub fn remaining(&self) -> &'static [Stage] {
        &Stage::ALL[self.index()..]
    }

    /// Resolve a queue name back to its stage.
    pub fn from_queue_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.queue_name() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name one of the six stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage '{0}': expected one of resume, ai-analysis, linkedin, github, interview, scoring")]
pub struct InvalidStage(pub String);

impl FromStr for Stage {
    type Err = InvalidStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| InvalidStage(s.to_string()))
    }
}

/// Identity of the candidate a job works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub candidate_id: String,
    pub job_profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
}

impl CandidateRef {
    pub fn new(candidate_id: impl Into<String>, job_profile_id: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            job_profile_id: job_profile_id.into(),
            batch_id: None,
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// Job payload, tagged by stage. Each variant carries only what its stage reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StagePayload {
    Resume {
        candidate: CandidateRef,
    },
    AiAnalysis {
        candidate: CandidateRef,
    },
    #[serde(rename = "linkedin")]
    LinkedIn {
        candidate: CandidateRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile_url: Option<String>,
    },
    #[serde(rename = "github")]
    GitHub {
        candidate: CandidateRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Interview {
        candidate: CandidateRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    Scoring {
        candidate: CandidateRef,
    },
}

impl StagePayload {
    /// Build the payload for `stage` with no stage-specific hints.
    pub fn for_stage(stage: Stage, candidate: CandidateRef) -> Self {
        match stage {
            Stage::Resume => StagePayload::Resume { candidate },
            Stage::AiAnalysis => StagePayload::AiAnalysis { candidate },
            Stage::LinkedIn => StagePayload::LinkedIn {
                candidate,
                profile_url: None,
            },
            Stage::GitHub => StagePayload::GitHub {
                candidate,
                username: None,
            },
            Stage::Interview => StagePayload::Interview {
                candidate,
                phone_number: None,
            },
            Stage::Scoring => StagePayload::Scoring { candidate },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Resume { .. } => Stage::Resume,
            StagePayload::AiAnalysis { .. } => Stage::AiAnalysis,
            StagePayload::LinkedIn { .. } => Stage::LinkedIn,
            StagePayload::GitHub { .. } => Stage::GitHub,
            StagePayload::Interview { .. } => Stage::Interview,
            StagePayload::Scoring { .. } => Stage::Scoring,
        }
    }

    pub fn candidate(&self) -> &CandidateRef {
        match self {
            StagePayload::Resume { candidate }
            | StagePayload::AiAnalysis { candidate }
            | StagePayload::LinkedIn { candidate, .. }
            | StagePayload::GitHub { candidate, .. }
            | StagePayload::Interview { candidate, .. }
            | StagePayload::Scoring { candidate } => candidate,
        }
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.candidate().batch_id
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn stage_names_parse_back() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
            assert_eq!(Stage::from_queue_name(stage.queue_name()), Some(stage));
        }
        assert!("transcript".parse::<Stage>().is_err());
    }

    #[test]
    fn remaining_slices_from_start_stage() {
        assert_eq!(Stage::Resume.remaining().len(), 6);
        assert_eq!(
            Stage::GitHub.remaining(),
            &[Stage::GitHub, Stage::Interview, Stage::Scoring]
        );
        assert_eq!(Stage::Scoring.remaining(), &[Stage::Scoring]);
    }

    #[test]
    fn priorities_are_distinct_and_descending() {
        let priorities: Vec<_> = Stage::ALL.iter().map(|s| s.priority()).collect();
        assert!(priorities.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn payload_is_tagged_by_stage() {
        let payload = StagePayload::for_stage(Stage::GitHub, CandidateRef::new("c1", "jp1"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["stage"], "github");
        assert_eq!(json["candidate"]["candidate_id"], "c1");
        let back: StagePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.stage(), Stage::GitHub);
    }
}
