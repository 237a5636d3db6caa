//! Configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! TOML files and `DATAKIT__*` environment variables.

pub mod logging;
pub mod unit_of_work;

use serde::{Deserialize, Serialize};

pub use self::logging::{LogFormat, LoggingConfig};
pub use self::unit_of_work::UnitOfWorkConfig;

use crate::error::AppError;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataKitConfig {
    /// Unit-of-work and transaction defaults.
    #[serde(default)]
    pub unit_of_work: UnitOfWorkConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DataKitConfig {
    /// Load configuration.
    ///
    /// Merges `config/default.toml` with an environment-specific overlay
    /// and environment variables prefixed with `DATAKIT`. Every source is
    /// optional; missing values fall back to the defaults.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("DATAKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
