//! Ordered provider fallback with per-attempt timeouts and backoff.

use std::sync::Arc;
use std::time::Duration;

use monitor::{ApiCounters, FailurePatternRecorder};
use pipeline_core::ErrorKind;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::analysis::StageAnalyzer;
use crate::provider::ProviderChain;
use crate::{ExecutorError, ProviderError};

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSuccess {
    pub provider: String,
    /// Attempts across all providers, including the successful one.
    pub attempts: u32,
    pub value: Value,
}

/// Tries each provider of a chain in order, retrying each with exponential
/// backoff, and reports every failed attempt to the failure recorder.
#[derive(Clone, Debug)]
pub struct FallbackExecutor {
    recorder: FailurePatternRecorder,
    counters: Arc<ApiCounters>,
    backoff_base: Duration,
    token: CancellationToken,
}

impl FallbackExecutor {
    pub fn new(recorder: FailurePatternRecorder, counters: Arc<ApiCounters>) -> Self {
        Self {
            recorder,
            counters,
            backoff_base: Duration::from_secs(1),
            token: CancellationToken::new(),
        }
    }

    /// Delay before retry `n` (zero based) is `base * 2^n`.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn recorder(&self) -> &FailurePatternRecorder {
        &self.recorder
    }

    pub fn counters(&self) -> &Arc<ApiCounters> {
        &self.counters
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Run `request` against `chain` on behalf of `candidate_id`.
    pub async fn execute(
        &self,
        candidate_id: &str,
        operation: &str,
        request: &Value,
        chain: &ProviderChain,
    ) -> Result<ProviderSuccess, ExecutorError> {
        let entries = chain.snapshot();
        if entries.is_empty() {
            return Err(ExecutorError::NoProviders);
        }

        let mut attempts = 0u32;
        let mut last_failure: Option<(String, ProviderError)> = None;

        for entry in entries {
            let name = entry.config.name.as_str();
            for attempt in 0..entry.config.max_retries.max(1) {
                if self.token.is_cancelled() {
                    return Err(ExecutorError::Cancelled);
                }

                attempts += 1;
                self.counters.record_call();
                tracing::debug!(
                    candidate_id = %candidate_id,
                    provider = %name,
                    operation = %operation,
                    attempt = attempt + 1,
                    "Calling provider"
                );

                let outcome =
                    match tokio::time::timeout(entry.config.timeout, entry.provider.call(request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::timeout(
                            entry.config.timeout.as_millis() as u64,
                        )),
                    };

                let error = match outcome {
                    Ok(value) => {
                        tracing::info!(
                            candidate_id = %candidate_id,
                            provider = %name,
                            operation = %operation,
                            attempts,
                            "Provider call succeeded"
                        );
                        return Ok(ProviderSuccess {
                            provider: name.to_string(),
                            attempts,
                            value,
                        });
                    }
                    Err(error) => error,
                };

                tracing::warn!(
                    candidate_id = %candidate_id,
                    provider = %name,
                    operation = %operation,
                    attempt = attempt + 1,
                    kind = %error.kind,
                    "Provider call failed: {}",
                    error.message
                );
                self.counters.record_error(error.kind);
                self.recorder
                    .record_failure(name, operation, error.kind, &error.message)
                    .await;
                last_failure = Some((name.to_string(), error));

                let is_last_attempt = attempt + 1 >= entry.config.max_retries.max(1);
                if !is_last_attempt {
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(ExecutorError::Cancelled),
                        _ = tokio::time::sleep(self.backoff(attempt)) => {}
                    }
                }
            }
            tracing::warn!(provider = %name, operation = %operation, "Provider exhausted, falling back");
        }

        let (last_provider, last_error) = last_failure.unwrap_or_else(|| {
            (
                String::new(),
                ProviderError::new(ErrorKind::Unknown, "no attempts made"),
            )
        });
        tracing::error!(
            candidate_id = %candidate_id,
            operation = %operation,
            attempts,
            "All providers failed"
        );
        Err(ExecutorError::AllProvidersFailed {
            attempts,
            last_provider,
            last_error,
        })
    }

    /// Build the request with `analyzer`, execute it and parse the answer.
    /// A response that does not parse is recorded as a validation failure
    /// and replaced by the analyzer's degraded result.
    pub async fn execute_analysis<A: StageAnalyzer>(
        &self,
        analyzer: &A,
        candidate_id: &str,
        input: &A::Input,
        chain: &ProviderChain,
    ) -> Result<A::Output, ExecutorError> {
        let operation = analyzer.operation();
        let request = analyzer.build_request(input);
        let success = self
            .execute(candidate_id, operation, &request, chain)
            .await?;

        match analyzer.parse_response(&success.value) {
            Ok(output) => Ok(output),
            Err(reason) => {
                tracing::warn!(
                    candidate_id = %candidate_id,
                    provider = %success.provider,
                    operation = %operation,
                    "Invalid provider response, using degraded result: {}",
                    reason
                );
                self.recorder
                    .record_failure(&success.provider, operation, ErrorKind::Validation, &reason)
                    .await;
                Ok(analyzer.degraded(input, &reason))
            }
        }
    }
}
