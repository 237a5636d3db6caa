//! Unit-of-work configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::IsolationLevel;

/// Defaults applied by every unit of work built from this configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOfWorkConfig {
    /// Isolation level of implicitly started transactions.
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    /// Command timeout pushed to the persistence context, in seconds.
    #[serde(default)]
    pub command_timeout_seconds: Option<u64>,
    /// Timeout of the outer scope used by multi-unit-of-work saves, in
    /// seconds. Unbounded when absent.
    #[serde(default)]
    pub scope_timeout_seconds: Option<u64>,
    /// Whether a successful save accepts all tracked changes.
    #[serde(default = "default_true")]
    pub accept_all_changes_on_success: bool,
}

impl UnitOfWorkConfig {
    /// Command timeout as a duration.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }

    /// Scope timeout as a duration.
    pub fn scope_timeout(&self) -> Option<Duration> {
        self.scope_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            command_timeout_seconds: None,
            scope_timeout_seconds: None,
            accept_all_changes_on_success: true,
        }
    }
}

fn default_true() -> bool {
    true
}
