//! JSON-over-HTTP provider.

use pipeline_core::ErrorKind;
use serde_json::Value;

use crate::ProviderError;
use crate::provider::{Provider, ProviderFuture};

/// Provider that POSTs the request as JSON and returns the JSON body.
#[derive(Clone)]
pub struct HttpProvider {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn transport_error(e: reqwest::Error) -> ProviderError {
        let status = e.status().map(|s| s.as_u16());
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_connect() {
            ErrorKind::Network
        } else if e.is_decode() {
            ErrorKind::Validation
        } else {
            ErrorKind::classify(status, &e.to_string())
        };
        ProviderError {
            kind,
            message: e.to_string(),
            status,
        }
    }

    async fn post(&self, request: &Value) -> Result<Value, ProviderError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(Self::transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::classify(
                Some(status.as_u16()),
                format!("{} returned {}: {}", self.endpoint, status, body),
            ));
        }

        response.json::<Value>().await.map_err(Self::transport_error)
    }
}

impl Provider for HttpProvider {
    fn call<'a>(&'a self, request: &'a Value) -> ProviderFuture<'a> {
        Box::pin(self.post(request))
    }
}
