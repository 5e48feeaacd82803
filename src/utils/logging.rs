//! Structured logging setup.
//!
//! Initializes a `tracing` subscriber from [`LoggingConfig`]. Components log
//! with structured fields (`session_id`, `connection_id`, `message_type`) so
//! output stays machine-filterable.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set. Fails if a subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ProtocolError::ConfigError(format!("failed to init logging: {e}")))
}
