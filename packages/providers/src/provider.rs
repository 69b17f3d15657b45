use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use monitor::{RecoveryContext, RecoveryFuture, RecoveryStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProviderError;

pub type ProviderResult = Result<Value, ProviderError>;

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = ProviderResult> + Send + 'a>>;

/// An external service that answers a JSON request.
pub trait Provider: Send + Sync + 'static {
    fn call<'a>(&'a self, request: &'a Value) -> ProviderFuture<'a>;
}

/// Retry and timeout settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Attempts made against this provider before moving on.
    pub max_retries: u32,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A configured provider in a chain.
#[derive(Clone)]
pub struct ChainEntry {
    pub config: ProviderConfig,
    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("config", &self.config)
            .finish()
    }
}

/// Ordered providers for one capability. The order can be rotated at
/// runtime by demoting a failing provider.
#[derive(Clone, Default)]
pub struct ProviderChain {
    entries: Arc<RwLock<Vec<ChainEntry>>>,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, config: ProviderConfig, provider: Arc<dyn Provider>) -> Self {
        self.push(config, provider);
        self
    }

    pub fn push(&self, config: ProviderConfig, provider: Arc<dyn Provider>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ChainEntry { config, provider });
    }

    /// Current order.
    pub fn snapshot(&self) -> Vec<ChainEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.config.name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.config.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Move `name` to the back. `false` if it is not in the chain.
    pub fn demote(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = entries.iter().position(|e| e.config.name == name) else {
            return false;
        };
        let entry = entries.remove(index);
        entries.push(entry);
        tracing::info!(provider = %name, "Provider demoted to the end of its chain");
        true
    }
}

impl RecoveryStrategy for ProviderChain {
    fn recover<'a>(&'a self, context: &'a RecoveryContext) -> RecoveryFuture<'a> {
        Box::pin(async move {
            if self.demote(&context.service) {
                Ok(())
            } else {
                Err(format!("{} is not in this provider chain", context.service))
            }
        })
    }
}
