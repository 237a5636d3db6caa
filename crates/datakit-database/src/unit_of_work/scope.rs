//! Explicit outer transaction scope.
//!
//! Several units of work enlist their transactions in one scope. Completion
//! runs a prepare pass over every enlisted transaction before committing any,
//! so a failed prepare or an expired timeout commits nothing. A commit that
//! fails after a successful prepare leaves the transactions committed before
//! it in place; see [`ContextTransaction::prepare`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use datakit_core::error::AppError;
use datakit_core::result::AppResult;
use datakit_core::traits::ContextTransaction;

/// An outer transaction spanning several contexts.
pub struct TransactionScope {
    id: Uuid,
    timeout: Duration,
    started: Instant,
    enlisted: Vec<Box<dyn ContextTransaction>>,
    completed: bool,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("enlisted", &self.enlisted.len())
            .field("completed", &self.completed)
            .finish()
    }
}

impl TransactionScope {
    /// Open a scope that must complete within `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let id = Uuid::now_v7();
        debug!(scope = %id, ?timeout, "Opened transaction scope");
        Self {
            id,
            timeout,
            started: Instant::now(),
            enlisted: Vec::new(),
            completed: false,
        }
    }

    /// Scope identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Time budget of the scope.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of enlisted transactions.
    pub fn len(&self) -> usize {
        self.enlisted.len()
    }

    /// Whether nothing is enlisted.
    pub fn is_empty(&self) -> bool {
        self.enlisted.is_empty()
    }

    /// Whether the scope committed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the time budget is spent.
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    /// Fail unless the scope can still take part in work.
    pub fn ensure_active(&self) -> AppResult<()> {
        if self.completed {
            return Err(AppError::invalid_state(format!(
                "Transaction scope {} has already completed",
                self.id
            )));
        }
        if self.is_expired() {
            return Err(AppError::timeout(format!(
                "Transaction scope {} exceeded its timeout of {:?}",
                self.id, self.timeout
            )));
        }
        Ok(())
    }

    /// Hand a transaction to the scope. It is committed or rolled back with
    /// the rest.
    pub fn enlist(&mut self, transaction: Box<dyn ContextTransaction>) {
        debug!(scope = %self.id, transaction = %transaction.id(), "Enlisted transaction");
        self.enlisted.push(transaction);
    }

    /// Commit every enlisted transaction.
    ///
    /// Any failure before the first commit, including an expired timeout,
    /// rolls every transaction back and returns the error. If a commit fails
    /// once others have committed, only the failed one and those after it
    /// are rolled back and the outcome is partial.
    pub async fn complete(&mut self) -> AppResult<()> {
        if let Err(e) = self.ensure_active() {
            self.rollback_all().await;
            return Err(e);
        }

        let mut failure = None;
        for transaction in &mut self.enlisted {
            if let Err(e) = transaction.prepare().await {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            error!(scope = %self.id, error = %e, "Transaction scope failed to prepare");
            self.rollback_all().await;
            return Err(e);
        }

        let mut enlisted = std::mem::take(&mut self.enlisted);
        let total = enlisted.len();
        for (index, transaction) in enlisted.iter_mut().enumerate() {
            if let Err(e) = transaction.commit().await {
                error!(
                    scope = %self.id,
                    committed = index,
                    total,
                    error = %e,
                    "Transaction scope failed to commit"
                );
                for rest in enlisted.iter_mut().skip(index) {
                    if let Err(e) = rest.rollback().await {
                        warn!(scope = %self.id, error = %e, "Rollback failed");
                    }
                }
                return Err(e);
            }
        }

        self.completed = true;
        info!(scope = %self.id, transactions = total, "Transaction scope completed");
        Ok(())
    }

    /// Roll back every enlisted transaction without completing.
    pub async fn dispose(&mut self) {
        if !self.enlisted.is_empty() {
            info!(scope = %self.id, transactions = self.enlisted.len(), "Disposing transaction scope");
        }
        self.rollback_all().await;
    }

    async fn rollback_all(&mut self) {
        for mut transaction in std::mem::take(&mut self.enlisted) {
            if let Err(e) = transaction.rollback().await {
                warn!(
                    scope = %self.id,
                    transaction = %transaction.id(),
                    error = %e,
                    "Rollback failed"
                );
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.completed && !self.enlisted.is_empty() {
            // Released handles roll back on drop.
            warn!(
                scope = %self.id,
                transactions = self.enlisted.len(),
                "Transaction scope dropped without completing"
            );
        }
    }
}
