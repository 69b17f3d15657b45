//! Multi-provider fallback for stages that call external services.
//!
//! A [`ProviderChain`] holds the ordered providers for one capability. The
//! [`FallbackExecutor`] walks the chain: each provider gets `max_retries`
//! attempts, each attempt is bounded by the provider's timeout, attempts
//! are separated by exponential backoff, and every failure is classified
//! and reported to the failure pattern recorder.

mod analysis;
mod error;
mod executor;
mod http;
mod provider;

pub use analysis::{AnalysisRequest, AnalysisResult, ScoredAnalyzer, StageAnalyzer};
pub use error::{ExecutorError, ProviderError};
pub use executor::{FallbackExecutor, ProviderSuccess};
pub use http::HttpProvider;
pub use provider::{
    ChainEntry, Provider, ProviderChain, ProviderConfig, ProviderFuture, ProviderResult,
};
