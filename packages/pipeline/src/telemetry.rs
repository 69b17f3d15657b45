//! Tracing subscriber set-up.

use tracing_subscriber::EnvFilter;

use crate::{LogConfig, PipelineError};

/// Install the global fmt subscriber. `RUST_LOG` wins over
/// `config.default_filter`. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), PipelineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| PipelineError::Config(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| PipelineError::Config(format!("tracing already initialised: {}", e)))
}
