//! Undo-log transactions for the in-memory backend.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use datakit_core::error::AppError;
use datakit_core::result::AppResult;
use datakit_core::traits::ContextTransaction;
use datakit_core::types::IsolationLevel;

use super::context::ContextState;
use super::lock;
use super::store::{FaultPoint, MemoryStore, UndoRecord};

/// Writes made while a transaction is active, newest last.
#[derive(Debug)]
pub(crate) struct TransactionLog {
    pub(crate) id: Uuid,
    pub(crate) undo: Vec<UndoRecord>,
}

impl TransactionLog {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            undo: Vec::new(),
        }
    }
}

/// Transaction handle returned by
/// [`MemoryContext::begin_transaction`](super::MemoryContext).
///
/// Writes land in the store immediately; rollback restores the prior rows.
/// A handle dropped before commit or rollback rolls back.
pub struct MemoryTransaction {
    id: Uuid,
    isolation_level: IsolationLevel,
    store: MemoryStore,
    context: Arc<Mutex<ContextState>>,
    finished: bool,
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("finished", &self.finished)
            .finish()
    }
}

impl MemoryTransaction {
    pub(crate) fn new(
        id: Uuid,
        isolation_level: IsolationLevel,
        store: MemoryStore,
        context: Arc<Mutex<ContextState>>,
    ) -> Self {
        Self {
            id,
            isolation_level,
            store,
            context,
            finished: false,
        }
    }

    fn ensure_pending(&self) -> AppResult<()> {
        if self.finished {
            return Err(AppError::invalid_state(format!(
                "Transaction {} has already completed",
                self.id
            )));
        }
        Ok(())
    }

    fn take_log(&self) -> Vec<UndoRecord> {
        let mut context = lock(&self.context);
        if context
            .transaction
            .as_ref()
            .is_some_and(|log| log.id == self.id)
        {
            context
                .transaction
                .take()
                .map(|log| log.undo)
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    fn undo(&self) -> usize {
        let records = self.take_log();
        let reverted = records.len();
        self.store.state().undo(records);
        reverted
    }
}

#[async_trait]
impl ContextTransaction for MemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    async fn prepare(&mut self) -> AppResult<()> {
        self.ensure_pending()?;
        if let Some(message) = self.store.take_fault(FaultPoint::Commit) {
            return Err(AppError::store(message));
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        self.ensure_pending()?;
        if let Some(message) = self.store.take_fault(FaultPoint::Commit) {
            return Err(AppError::store(message));
        }
        let writes = self.take_log().len();
        self.finished = true;
        debug!(transaction = %self.id, writes, "Committed transaction");
        Ok(())
    }

    async fn rollback(&mut self) -> AppResult<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(message) = self.store.take_fault(FaultPoint::Rollback) {
            return Err(AppError::store(message));
        }
        let reverted = self.undo();
        self.finished = true;
        debug!(transaction = %self.id, reverted, "Rolled back transaction");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let reverted = self.undo();
            debug!(transaction = %self.id, reverted, "Rolled back released transaction");
        }
    }
}
