//! [`PersistenceContext`] implementation over a [`MemoryStore`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use datakit_core::error::AppError;
use datakit_core::query::{IncludePath, Predicate, QueryPlan, QuerySource};
use datakit_core::result::AppResult;
use datakit_core::traits::{ContextTransaction, Entity, EntityKey, PersistenceContext, UpdateFn};
use datakit_core::types::{EntityState, IsolationLevel, TrackingMode, Value};

use super::history::AutoHistory;
use super::lock;
use super::store::{FaultPoint, MemoryStore, StoreState, StoredRow, UndoRecord};
use super::tracker::{ChangeTracker, TrackedEntry};
use super::transaction::{MemoryTransaction, TransactionLog};

/// Per-connection state shared by every clone of a context.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    pub(crate) tracker: ChangeTracker,
    pub(crate) transaction: Option<TransactionLog>,
    command_timeout: Option<Duration>,
    closed: bool,
}

impl ContextState {
    /// Attach writes to the active transaction; without one they are final.
    fn record(&mut self, undo: Vec<UndoRecord>) {
        if let Some(log) = self.transaction.as_mut() {
            log.undo.extend(undo);
        }
    }
}

/// A connection to a [`MemoryStore`] with its own change tracker and
/// transaction.
///
/// Clones share the connection. Reads see every write already applied to
/// the store, including uncommitted writes of other contexts.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    id: Uuid,
    store: MemoryStore,
    state: Arc<Mutex<ContextState>>,
}

impl MemoryContext {
    /// Open a connection on `store`.
    pub fn new(store: MemoryStore) -> Self {
        let id = Uuid::now_v7();
        debug!(context = %id, "Opened memory context");
        Self {
            id,
            store,
            state: Arc::new(Mutex::new(ContextState::default())),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The store behind this connection.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Whether a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.state().transaction.is_some()
    }

    // Lock order: context state before store state.
    fn state(&self) -> MutexGuard<'_, ContextState> {
        lock(&self.state)
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.state().closed {
            return Err(AppError::invalid_state(format!(
                "Context {} has been closed",
                self.id
            )));
        }
        Ok(())
    }

    fn sql_handler(&self) -> AppResult<Arc<dyn super::SqlHandler>> {
        self.store.sql_handler().ok_or_else(|| {
            AppError::not_implemented("The memory store has no SQL handler configured")
        })
    }

    /// Rows of `T` visible to a query with the given source.
    fn base_rows<T: Entity>(&self, source: QuerySource) -> AppResult<Vec<T>> {
        let documents: Vec<serde_json::Value> = {
            let store = self.store.state();
            store.table(T::NAME).map_or_else(Vec::new, |table| {
                table
                    .scan()
                    .into_iter()
                    .map(|(_, row)| row.document.clone())
                    .collect()
            })
        };
        let rows = documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;

        if source.ignore_query_filters {
            return Ok(rows);
        }
        Ok(match self.store.query_filter::<T>() {
            Some(filter) => rows.into_iter().filter(|row| filter.matches(row)).collect(),
            None => rows,
        })
    }

    /// Rows of `T` passing the global filter and `predicate`, with their
    /// stored form. The rows are copied out first so the predicate runs
    /// without the store lock held.
    fn matching_rows<T: Entity>(
        &self,
        predicate: &Predicate<T>,
    ) -> AppResult<Vec<(EntityKey, StoredRow, T)>> {
        let snapshot: Vec<(EntityKey, StoredRow)> = self
            .store
            .state()
            .table(T::NAME)
            .map(|table| {
                table
                    .scan()
                    .into_iter()
                    .map(|(key, row)| (key.clone(), row.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let filter = self.store.query_filter::<T>().unwrap_or_default();
        let mut matches = Vec::new();
        for (key, row) in snapshot {
            let entity: T = serde_json::from_value(row.document.clone())?;
            if filter.matches(&entity) && predicate.matches(&entity) {
                matches.push((key, row, entity));
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl PersistenceContext for MemoryContext {
    async fn fetch<T: Entity>(&self, plan: &QueryPlan<T>) -> AppResult<Vec<T>> {
        self.ensure_open()?;
        let source = plan.source();
        let rows = plan.apply(self.base_rows::<T>(source)?)?;

        let includes: Vec<&str> = plan.includes().map(IncludePath::as_str).collect();
        if !includes.is_empty() {
            // Navigations are embedded in the stored documents.
            debug!(table = T::NAME, ?includes, "Resolved includes from documents");
        }

        if source.tracking == TrackingMode::Tracked {
            let mut state = self.state();
            for row in &rows {
                state
                    .tracker
                    .attach(T::NAME, row.key(), serde_json::to_value(row)?);
            }
        }

        debug!(
            table = T::NAME,
            rows = rows.len(),
            steps = ?plan.describe(),
            "Fetched rows"
        );
        Ok(rows)
    }

    async fn count<T: Entity>(&self, plan: &QueryPlan<T>) -> AppResult<u64> {
        self.ensure_open()?;
        let total = plan.count(self.base_rows::<T>(plan.source())?)?;
        debug!(table = T::NAME, total, "Counted rows");
        Ok(total)
    }

    async fn find<T: Entity>(
        &self,
        key: &EntityKey,
        tracking: TrackingMode,
    ) -> AppResult<Option<T>> {
        self.ensure_open()?;
        if tracking == TrackingMode::Tracked {
            let state = self.state();
            if let Some(entry) = state.tracker.entry(T::NAME, key) {
                if entry.state == EntityState::Deleted {
                    return Ok(None);
                }
                return Ok(Some(serde_json::from_value(entry.current.clone())?));
            }
        }

        let document = self
            .store
            .state()
            .table(T::NAME)
            .and_then(|table| table.get(key))
            .map(|row| row.document.clone());
        let Some(document) = document else {
            return Ok(None);
        };

        let entity: T = serde_json::from_value(document.clone())?;
        if let Some(filter) = self.store.query_filter::<T>() {
            if !filter.matches(&entity) {
                return Ok(None);
            }
        }
        if tracking == TrackingMode::Tracked {
            self.state().tracker.attach(T::NAME, key.clone(), document);
        }
        Ok(Some(entity))
    }

    fn add<T: Entity>(&self, entity: T) -> AppResult<()> {
        self.ensure_open()?;
        let document = serde_json::to_value(&entity)?;
        self.state().tracker.add(T::NAME, entity.key(), document)
    }

    fn update<T: Entity>(&self, entity: T, properties: &[&str]) -> AppResult<()> {
        self.ensure_open()?;
        let document = serde_json::to_value(&entity)?;
        for property in properties {
            let name = property.trim();
            if name.is_empty() {
                return Err(AppError::argument("Property names must not be blank"));
            }
            if document.get(name).is_none() {
                return Err(AppError::argument(format!(
                    "'{}' has no property '{name}'",
                    T::NAME
                )));
            }
        }
        self.state()
            .tracker
            .update(T::NAME, entity.key(), document, properties);
        Ok(())
    }

    fn remove<T: Entity>(&self, entity: T) -> AppResult<()> {
        self.ensure_open()?;
        let document = serde_json::to_value(&entity)?;
        self.state().tracker.remove(T::NAME, entity.key(), document);
        Ok(())
    }

    fn entity_state<T: Entity>(&self, entity: &T) -> EntityState {
        self.state().tracker.state(T::NAME, &entity.key())
    }

    async fn update_where<T: Entity>(
        &self,
        predicate: &Predicate<T>,
        update: &UpdateFn<T>,
    ) -> AppResult<u64> {
        self.ensure_open()?;

        // User code runs before any lock is taken.
        let mut writes = Vec::new();
        for (key, row, mut entity) in self.matching_rows(predicate)? {
            update(&mut entity);
            let document = serde_json::to_value(&entity)?;
            writes.push((key, StoredRow { seq: row.seq, document }));
        }

        let mut state = self.state();
        let mut store = self.store.state();
        let table = store.table_mut(T::NAME);
        let mut undo = Vec::with_capacity(writes.len());
        for (key, row) in writes {
            // Rows deleted since the scan stay deleted.
            if !table.contains(&key) {
                continue;
            }
            undo.push(UndoRecord {
                table: T::NAME.to_string(),
                previous: table.put(key.clone(), row),
                key,
            });
        }
        let affected = undo.len() as u64;
        state.record(undo);

        debug!(table = T::NAME, affected, "Bulk updated rows");
        Ok(affected)
    }

    async fn remove_where<T: Entity>(&self, predicate: &Predicate<T>) -> AppResult<u64> {
        self.ensure_open()?;
        let keys: Vec<EntityKey> = self
            .matching_rows(predicate)?
            .into_iter()
            .map(|(key, _, _)| key)
            .collect();

        let mut state = self.state();
        let mut store = self.store.state();
        let table = store.table_mut(T::NAME);
        let undo: Vec<UndoRecord> = keys
            .into_iter()
            .filter_map(|key| {
                table.delete(&key).map(|previous| UndoRecord {
                    table: T::NAME.to_string(),
                    previous: Some(previous),
                    key,
                })
            })
            .collect();
        let affected = undo.len() as u64;
        state.record(undo);

        debug!(table = T::NAME, affected, "Bulk deleted rows");
        Ok(affected)
    }

    fn has_changes(&self) -> bool {
        let mut state = self.state();
        if state.tracker.auto_detect() {
            state.tracker.detect_changes();
        }
        state.tracker.has_changes()
    }

    fn detect_changes(&self) {
        self.state().tracker.detect_changes();
    }

    fn auto_detect_changes(&self) -> bool {
        self.state().tracker.auto_detect()
    }

    fn set_auto_detect_changes(&self, enabled: bool) {
        self.state().tracker.set_auto_detect(enabled);
    }

    fn accept_all_changes(&self) {
        self.state().tracker.accept_all();
    }

    fn detach_all(&self) {
        let mut state = self.state();
        let detached = state.tracker.len();
        state.tracker.detach_all();
        debug!(context = %self.id, detached, "Detached tracked entities");
    }

    fn ensure_auto_history(&self) -> AppResult<usize> {
        self.ensure_open()?;
        let options = self.store.history_options();
        let mut state = self.state();
        if state.tracker.auto_detect() {
            state.tracker.detect_changes();
        }
        let entries: Vec<TrackedEntry> = state
            .tracker
            .pending()
            .into_iter()
            .filter(|entry| entry.table != AutoHistory::NAME)
            .collect();

        for entry in &entries {
            let history = AutoHistory::describe(self.store.next_history_id(), entry, &options)?;
            let document = serde_json::to_value(&history)?;
            state.tracker.add(AutoHistory::NAME, history.key(), document)?;
        }
        Ok(entries.len())
    }

    async fn save_changes(&self, accept_all_changes_on_success: bool) -> AppResult<u64> {
        self.ensure_open()?;
        if let Some(message) = self.store.take_fault(FaultPoint::Save) {
            return Err(AppError::store(message));
        }

        let mut state = self.state();
        if state.tracker.auto_detect() {
            state.tracker.detect_changes();
        }
        let pending = state.tracker.pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut store = self.store.state();
        let mut undo = Vec::with_capacity(pending.len());
        if let Err(e) = apply_entries(&mut store, &pending, &mut undo) {
            store.undo(undo);
            warn!(context = %self.id, error = %e, "Save failed, store left unchanged");
            return Err(e);
        }
        drop(store);

        state.record(undo);
        if accept_all_changes_on_success {
            state.tracker.accept_all();
        }

        let affected = pending.len() as u64;
        debug!(context = %self.id, affected, "Saved changes");
        Ok(affected)
    }

    async fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> AppResult<Box<dyn ContextTransaction>> {
        self.ensure_open()?;
        let mut state = self.state();
        if state.transaction.is_some() {
            return Err(AppError::invalid_state(
                "There's already an active transaction.",
            ));
        }
        let id = Uuid::now_v7();
        state.transaction = Some(TransactionLog::new(id));
        debug!(context = %self.id, transaction = %id, %isolation_level, "Began transaction");
        Ok(Box::new(MemoryTransaction::new(
            id,
            isolation_level,
            self.store.clone(),
            self.state.clone(),
        )))
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> AppResult<u64> {
        self.ensure_open()?;
        let affected = self.sql_handler()?.execute(sql, params)?;
        debug!(context = %self.id, affected, "Executed raw SQL");
        Ok(affected)
    }

    async fn from_sql<T: Entity>(&self, sql: &str, params: &[Value]) -> AppResult<Vec<T>> {
        self.ensure_open()?;
        let documents = self.sql_handler()?.query(sql, params)?;
        let rows = documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok(rows)
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.state().command_timeout
    }

    fn set_command_timeout(&self, timeout: Option<Duration>) {
        self.state().command_timeout = timeout;
    }

    async fn close(&self) -> AppResult<()> {
        let pending = {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.tracker.detach_all();
            state.transaction.take()
        };
        if let Some(log) = pending {
            self.store.state().undo(log.undo);
        }
        self.store.record_close();
        debug!(context = %self.id, "Closed memory context");
        Ok(())
    }
}

/// Write pending entries to the store, recording how to undo each write.
fn apply_entries(
    store: &mut StoreState,
    pending: &[TrackedEntry],
    undo: &mut Vec<UndoRecord>,
) -> AppResult<()> {
    for entry in pending {
        let stored = store
            .table(entry.table)
            .and_then(|table| table.get(&entry.key))
            .cloned();

        let row = match (entry.state, stored) {
            (EntityState::Added, Some(_)) => {
                return Err(AppError::store(format!(
                    "Cannot insert duplicate key '{}' into '{}'",
                    entry.key, entry.table
                )));
            }
            (EntityState::Added, None) => Some(StoredRow {
                seq: store.next_seq(),
                document: entry.current.clone(),
            }),
            (EntityState::Modified, Some(stored)) => {
                let document = match &entry.modified {
                    None => entry.current.clone(),
                    Some(properties) => merge_properties(stored.document, &entry.current, properties),
                };
                Some(StoredRow {
                    seq: stored.seq,
                    document,
                })
            }
            (EntityState::Deleted, Some(_)) => None,
            (EntityState::Modified | EntityState::Deleted, None) => {
                return Err(AppError::store(format!(
                    "Row '{}' of '{}' no longer exists",
                    entry.key, entry.table
                )));
            }
            _ => continue,
        };

        let table = store.table_mut(entry.table);
        let previous = match row {
            Some(row) => table.put(entry.key.clone(), row),
            None => table.delete(&entry.key),
        };
        undo.push(UndoRecord {
            table: entry.table.to_string(),
            key: entry.key.clone(),
            previous,
        });
    }
    Ok(())
}

/// Copy the named top-level properties of `current` onto `stored`.
fn merge_properties(
    mut stored: serde_json::Value,
    current: &serde_json::Value,
    properties: &BTreeSet<String>,
) -> serde_json::Value {
    if let (Some(target), Some(source)) = (stored.as_object_mut(), current.as_object()) {
        for property in properties {
            if let Some(value) = source.get(property) {
                target.insert(property.clone(), value.clone());
            }
        }
    }
    stored
}
