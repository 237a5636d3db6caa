//! Tracking, entity and transaction state enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether entities returned by a query are attached to the change tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Results are attached to the change tracker as unchanged entries.
    Tracked,
    /// Results are detached snapshots.
    #[default]
    NoTracking,
}

/// Change-tracker state of a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Not tracked.
    Detached,
    /// Tracked with no pending change.
    Unchanged,
    /// Pending insert.
    Added,
    /// Pending update.
    Modified,
    /// Pending delete.
    Deleted,
}

impl EntityState {
    /// Whether this state represents a change that `save_changes` persists.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => write!(f, "detached"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Transaction isolation level requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is read.
    #[default]
    ReadCommitted,
    /// Rows read stay stable for the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadUncommitted => write!(f, "read_uncommitted"),
            Self::ReadCommitted => write!(f, "read_committed"),
            Self::RepeatableRead => write!(f, "repeatable_read"),
            Self::Serializable => write!(f, "serializable"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Lifecycle position of a unit of work's transaction.
///
/// `Committed` and `RolledBack` are terminal outcomes of the last
/// transaction; in both the handle has already been released, so a new
/// transaction may begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction has been started yet.
    #[default]
    NoTransaction,
    /// A transaction handle is held.
    Active,
    /// The last transaction committed.
    Committed,
    /// The last transaction rolled back.
    RolledBack,
}

impl TransactionState {
    /// Whether a new transaction may begin from this state.
    pub fn can_begin(self) -> bool {
        !matches!(self, Self::Active)
    }
}
