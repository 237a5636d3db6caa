//! In-process persistence backend.
//!
//! Rows are stored as JSON documents; query plans run in-process. Writes
//! apply to the store immediately and transactions keep an undo log, so a
//! rollback (or a dropped transaction handle) restores the prior rows.

pub mod context;
pub mod history;
pub mod store;
pub mod tracker;
pub mod transaction;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use context::MemoryContext;
pub use history::{AutoHistory, AutoHistoryOptions};
pub use store::{MemoryStore, SqlHandler};
pub use tracker::{ChangeTracker, TrackedEntry};
pub use transaction::MemoryTransaction;

/// Lock a mutex, recovering the data of a poisoned one.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
