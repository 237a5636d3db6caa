//! The persistence-context contract.
//!
//! A persistence context is a handle over a store that provides entity
//! sets, a change tracker, transaction control and raw SQL. Handles are
//! cheap to clone; every clone addresses the same tracker and transaction.

use std::time::Duration;

use async_trait::async_trait;

use crate::query::{Predicate, QueryPlan};
use crate::result::AppResult;
use crate::traits::entity::{Entity, EntityKey};
use crate::traits::transaction::ContextTransaction;
use crate::types::{EntityState, IsolationLevel, TrackingMode, Value};

/// In-place mutation applied by bulk updates.
pub type UpdateFn<T> = dyn Fn(&mut T) + Send + Sync;

/// Store access used by the compiler, repositories and the unit of work.
///
/// Query execution must honour the step order of the [`QueryPlan`]. Staging
/// methods only touch the change tracker; nothing reaches the store until
/// [`PersistenceContext::save_changes`].
#[async_trait]
pub trait PersistenceContext: Clone + Send + Sync + 'static {
    /// Execute a plan and materialize the rows.
    async fn fetch<T: Entity>(&self, plan: &QueryPlan<T>) -> AppResult<Vec<T>>;

    /// Count the rows a plan yields.
    async fn count<T: Entity>(&self, plan: &QueryPlan<T>) -> AppResult<u64>;

    /// Load a single entity by primary key.
    async fn find<T: Entity>(&self, key: &EntityKey, tracking: TrackingMode)
    -> AppResult<Option<T>>;

    /// Stage an insert.
    fn add<T: Entity>(&self, entity: T) -> AppResult<()>;

    /// Stage an update. With no property names the whole entity is marked
    /// modified; otherwise only the named properties.
    fn update<T: Entity>(&self, entity: T, properties: &[&str]) -> AppResult<()>;

    /// Stage a delete.
    fn remove<T: Entity>(&self, entity: T) -> AppResult<()>;

    /// Change-tracker state of an entity.
    fn entity_state<T: Entity>(&self, entity: &T) -> EntityState;

    /// Update every matching row directly in the store.
    async fn update_where<T: Entity>(
        &self,
        predicate: &Predicate<T>,
        update: &UpdateFn<T>,
    ) -> AppResult<u64>;

    /// Delete every matching row directly in the store.
    async fn remove_where<T: Entity>(&self, predicate: &Predicate<T>) -> AppResult<u64>;

    /// Whether the tracker holds pending inserts, updates or deletes.
    fn has_changes(&self) -> bool;

    /// Reconcile tracked entries with their snapshots.
    fn detect_changes(&self);

    /// Whether `has_changes`/`save_changes` run change detection first.
    fn auto_detect_changes(&self) -> bool;

    /// Toggle automatic change detection.
    fn set_auto_detect_changes(&self, enabled: bool);

    /// Mark every pending entry as persisted.
    fn accept_all_changes(&self);

    /// Detach every tracked entity.
    fn detach_all(&self);

    /// Stage audit rows describing the pending changes. Returns how many
    /// were staged.
    fn ensure_auto_history(&self) -> AppResult<usize>;

    /// Persist pending changes; returns the affected row count.
    async fn save_changes(&self, accept_all_changes_on_success: bool) -> AppResult<u64>;

    /// Start a store transaction.
    async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> AppResult<Box<dyn ContextTransaction>>;

    /// Run a raw command, bypassing the change tracker.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> AppResult<u64>;

    /// Run a raw query, bypassing the change tracker.
    async fn from_sql<T: Entity>(&self, sql: &str, params: &[Value]) -> AppResult<Vec<T>>;

    /// Command timeout.
    fn command_timeout(&self) -> Option<Duration>;

    /// Set the command timeout.
    fn set_command_timeout(&self, timeout: Option<Duration>);

    /// Close the underlying connection.
    async fn close(&self) -> AppResult<()>;
}
