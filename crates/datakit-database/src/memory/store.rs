//! Shared in-memory row storage.
//!
//! A [`MemoryStore`] is the "database" behind any number of
//! [`MemoryContext`](super::MemoryContext) handles. Rows are serialized
//! entity documents keyed by set name and primary key; scans return rows in
//! insertion order.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use datakit_core::query::Predicate;
use datakit_core::result::AppResult;
use datakit_core::traits::{Entity, EntityKey};
use datakit_core::types::Value;

use super::context::MemoryContext;
use super::history::AutoHistoryOptions;
use super::lock;

/// Raw SQL executor plugged into a store.
///
/// The in-memory backend does not parse SQL; a handler decides what a
/// statement means.
pub trait SqlHandler: Send + Sync + 'static {
    /// Run a command and return the affected row count.
    fn execute(&self, sql: &str, params: &[Value]) -> AppResult<u64>;

    /// Run a query and return the rows as JSON documents.
    fn query(&self, sql: &str, params: &[Value]) -> AppResult<Vec<serde_json::Value>>;
}

/// A stored row.
#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub(crate) seq: u64,
    pub(crate) document: serde_json::Value,
}

/// One set of rows.
#[derive(Debug, Default)]
pub(crate) struct Table {
    rows: HashMap<EntityKey, StoredRow>,
}

impl Table {
    pub(crate) fn get(&self, key: &EntityKey) -> Option<&StoredRow> {
        self.rows.get(key)
    }

    pub(crate) fn contains(&self, key: &EntityKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows in insertion order.
    pub(crate) fn scan(&self) -> Vec<(&EntityKey, &StoredRow)> {
        let mut rows: Vec<_> = self.rows.iter().collect();
        rows.sort_by_key(|(_, row)| row.seq);
        rows
    }

    /// Write a row, returning the previous one.
    pub(crate) fn put(&mut self, key: EntityKey, row: StoredRow) -> Option<StoredRow> {
        self.rows.insert(key, row)
    }

    pub(crate) fn delete(&mut self, key: &EntityKey) -> Option<StoredRow> {
        self.rows.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Prior state of a row, replayed on rollback.
#[derive(Debug, Clone)]
pub(crate) struct UndoRecord {
    pub(crate) table: String,
    pub(crate) key: EntityKey,
    pub(crate) previous: Option<StoredRow>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    tables: HashMap<String, Table>,
    next_seq: u64,
}

impl StoreState {
    pub(crate) fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_string()).or_default()
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Replay undo records newest first.
    pub(crate) fn undo(&mut self, records: Vec<UndoRecord>) {
        for record in records.into_iter().rev() {
            let table = self.table_mut(&record.table);
            match record.previous {
                Some(row) => {
                    table.put(record.key, row);
                }
                None => {
                    table.delete(&record.key);
                }
            }
        }
    }
}

/// Failures injected into the next matching operation.
#[derive(Debug, Default)]
struct Faults {
    save: Option<String>,
    commit: Option<String>,
    rollback: Option<String>,
}

/// Operation a fault can be injected into.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FaultPoint {
    Save,
    Commit,
    Rollback,
}

type FilterMap = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// Thread-safe, cheaply cloneable in-memory database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    filters: Arc<Mutex<FilterMap>>,
    faults: Arc<Mutex<Faults>>,
    sql: Arc<Mutex<Option<Arc<dyn SqlHandler>>>>,
    history: Arc<Mutex<AutoHistoryOptions>>,
    next_history_id: Arc<AtomicUsize>,
    closed_connections: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("closed_connections", &self.closed_connections())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new context (connection) on this store.
    pub fn context(&self) -> MemoryContext {
        MemoryContext::new(self.clone())
    }

    /// Insert rows directly, bypassing change tracking and transactions.
    /// Existing rows with the same key are replaced.
    pub fn seed<T, I>(&self, rows: I) -> AppResult<usize>
    where
        T: Entity,
        I: IntoIterator<Item = T>,
    {
        let mut state = self.state();
        let mut inserted = 0;
        for row in rows {
            let document = serde_json::to_value(&row)?;
            let seq = state.next_seq();
            state
                .table_mut(T::NAME)
                .put(row.key(), StoredRow { seq, document });
            inserted += 1;
        }
        debug!(table = T::NAME, inserted, "Seeded rows");
        Ok(inserted)
    }

    /// Snapshot of every row of a set in insertion order, ignoring query
    /// filters.
    pub fn rows<T: Entity>(&self) -> AppResult<Vec<T>> {
        let state = self.state();
        let Some(table) = state.table(T::NAME) else {
            return Ok(Vec::new());
        };
        let rows = table
            .scan()
            .into_iter()
            .map(|(_, row)| serde_json::from_value(row.document.clone()))
            .collect::<Result<Vec<T>, _>>()?;
        Ok(rows)
    }

    /// Number of stored rows in a set.
    pub fn row_count(&self, table: &str) -> usize {
        self.state().table(table).map_or(0, Table::len)
    }

    /// Register a global query filter for `T`. Filters registered for the
    /// same set are AND-combined.
    pub fn add_query_filter<T: Entity>(&self, predicate: Predicate<T>) {
        let mut filters = lock(&self.filters);
        let combined = match filters
            .get(T::NAME)
            .and_then(|existing| existing.downcast_ref::<Predicate<T>>())
        {
            Some(existing) => existing.clone().and(predicate),
            None => predicate,
        };
        filters.insert(T::NAME, Arc::new(combined));
    }

    /// The global query filter for `T`, if any.
    pub fn query_filter<T: Entity>(&self) -> Option<Predicate<T>> {
        lock(&self.filters)
            .get(T::NAME)
            .and_then(|filter| filter.downcast_ref::<Predicate<T>>())
            .cloned()
    }

    /// Plug in a raw SQL handler.
    pub fn set_sql_handler(&self, handler: impl SqlHandler) {
        *lock(&self.sql) = Some(Arc::new(handler));
    }

    pub(crate) fn sql_handler(&self) -> Option<Arc<dyn SqlHandler>> {
        lock(&self.sql).clone()
    }

    /// Replace the auto-history length limits.
    pub fn set_history_options(&self, options: AutoHistoryOptions) {
        *lock(&self.history) = options;
    }

    pub(crate) fn history_options(&self) -> AutoHistoryOptions {
        lock(&self.history).clone()
    }

    /// Make the next save fail with a store error.
    pub fn fail_next_save(&self, message: impl Into<String>) {
        lock(&self.faults).save = Some(message.into());
    }

    /// Make the next commit (or prepare) fail with a store error.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        lock(&self.faults).commit = Some(message.into());
    }

    /// Make the next rollback fail with a store error.
    pub fn fail_next_rollback(&self, message: impl Into<String>) {
        lock(&self.faults).rollback = Some(message.into());
    }

    pub(crate) fn take_fault(&self, point: FaultPoint) -> Option<String> {
        let mut faults = lock(&self.faults);
        match point {
            FaultPoint::Save => faults.save.take(),
            FaultPoint::Commit => faults.commit.take(),
            FaultPoint::Rollback => faults.rollback.take(),
        }
    }

    /// How many contexts were closed against this store.
    pub fn closed_connections(&self) -> usize {
        self.closed_connections.load(Ordering::SeqCst)
    }

    pub(crate) fn record_close(&self) {
        self.closed_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn next_history_id(&self) -> i64 {
        (self.next_history_id.fetch_add(1, Ordering::SeqCst) + 1) as i64
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }
}
