//! Logging configuration.

use serde::{Deserialize, Serialize};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Tracing subscriber settings. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"datakit_database=debug"`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format: JSON lines or pretty multi-line text.
    #[serde(default)]
    pub format: LogFormat,
    /// Include the event target (module path) in output.
    #[serde(default = "default_targets")]
    pub targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            targets: default_targets(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_targets() -> bool {
    true
}
