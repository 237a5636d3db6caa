//! Tracing subscriber setup.

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use datakit_core::config::{LogFormat, LoggingConfig};
use datakit_core::error::AppError;
use datakit_core::result::AppResult;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already set.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(config.targets)
            .with_thread_ids(true)
            .try_init(),
        LogFormat::Pretty => fmt()
            .pretty()
            .with_env_filter(filter)
            .with_target(config.targets)
            .try_init(),
    };

    result.map_err(|e| AppError::internal(format!("Failed to install tracing subscriber: {e}")))?;
    info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
