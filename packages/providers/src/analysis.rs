//! Request building and response parsing for provider-backed stages.

use pipeline_core::Stage;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Plugs a stage's request and response shapes into the executor.
pub trait StageAnalyzer: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    /// Operation name used for failure patterns.
    fn operation(&self) -> &str;

    fn build_request(&self, input: &Self::Input) -> Value;

    fn parse_response(&self, response: &Value) -> Result<Self::Output, String>;

    /// Safe result used when the response cannot be parsed.
    fn degraded(&self, input: &Self::Input, reason: &str) -> Self::Output;
}

/// What a stage asks a provider to analyse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub candidate_id: String,
    pub job_profile_id: String,
    pub stage: Stage,
    /// Stage-specific material, such as resume text or a profile URL.
    pub context: Value,
}

/// Scored answer from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 0 to 100.
    pub score: f64,
    /// 0 to 1.
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub degraded: bool,
}

impl AnalysisResult {
    /// Zero-confidence result standing in for an unusable answer.
    pub fn degraded(reason: &str) -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            summary: format!("analysis unavailable: {}", reason),
            details: Value::Null,
            degraded: true,
        }
    }

    /// Parse and range-check a provider response.
    pub fn from_response(response: &Value) -> Result<Self, String> {
        let score = response
            .get("score")
            .and_then(Value::as_f64)
            .ok_or("missing numeric field `score`")?;
        let confidence = response
            .get("confidence")
            .and_then(Value::as_f64)
            .ok_or("missing numeric field `confidence`")?;
        if !(0.0..=100.0).contains(&score) {
            return Err(format!("score {} out of range", score));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence {} out of range", confidence));
        }
        let summary = response
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            score,
            confidence,
            summary,
            details: response.get("details").cloned().unwrap_or(Value::Null),
            degraded: false,
        })
    }
}

/// Analyzer sending an [`AnalysisRequest`] as JSON and expecting an
/// [`AnalysisResult`] back.
#[derive(Debug, Clone)]
pub struct ScoredAnalyzer {
    operation: String,
}

impl ScoredAnalyzer {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn for_stage(stage: Stage) -> Self {
        Self::new(stage.queue_name())
    }
}

impl StageAnalyzer for ScoredAnalyzer {
    type Input = AnalysisRequest;
    type Output = AnalysisResult;

    fn operation(&self) -> &str {
        &self.operation
    }

    fn build_request(&self, input: &AnalysisRequest) -> Value {
        json!({
            "operation": self.operation,
            "candidate_id": input.candidate_id,
            "job_profile_id": input.job_profile_id,
            "stage": input.stage.as_str(),
            "context": input.context,
        })
    }

    fn parse_response(&self, response: &Value) -> Result<AnalysisResult, String> {
        AnalysisResult::from_response(response)
    }

    fn degraded(&self, _input: &AnalysisRequest, reason: &str) -> AnalysisResult {
        AnalysisResult::degraded(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_response() {
        let result = AnalysisResult::from_response(&json!({
            "score": 82.5,
            "confidence": 0.9,
            "summary": "strong match",
        }));
        assert_eq!(
            result.map(|r| (r.score, r.summary)),
            Ok((82.5, "strong match".to_string()))
        );
    }

    #[test]
    fn test_reject_invalid_shapes() {
        assert!(AnalysisResult::from_response(&json!({"status": "ok"})).is_err());
        assert!(AnalysisResult::from_response(&json!({"score": 140, "confidence": 0.5})).is_err());
        assert!(AnalysisResult::from_response(&json!({"score": "high", "confidence": 0.5})).is_err());
    }

    #[test]
    fn test_degraded_has_zero_confidence() {
        let result = AnalysisResult::degraded("bad json");
        assert_eq!(result.confidence, 0.0);
        assert!(result.degraded);
    }
}
