//! Unit of work.
//!
//! A [`UnitOfWork`] owns one persistence context for its lifetime and at
//! most one active transaction on it. `save_changes` wraps persistence in a
//! transaction when none is active and commits it when rows were affected;
//! any failure rolls back and surfaces the original error.

pub mod multi;
pub mod scope;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use datakit_core::config::UnitOfWorkConfig;
use datakit_core::error::AppError;
use datakit_core::result::AppResult;
use datakit_core::traits::{ContextTransaction, Entity, PersistenceContext};
use datakit_core::types::{IsolationLevel, TransactionState, Value};

use crate::repository::{Repository, RepositoryRegistry, ensure_sql};

pub use multi::{MultiSaveOptions, SaveChanges, save_changes_all};
pub use scope::TransactionScope;

/// Options of a single save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Mark tracked entries as persisted after a successful save.
    pub accept_all_changes_on_success: bool,
    /// Stage an audit row per pending change before saving.
    pub ensure_history: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            accept_all_changes_on_success: true,
            ensure_history: false,
        }
    }
}

impl From<&UnitOfWorkConfig> for SaveOptions {
    fn from(config: &UnitOfWorkConfig) -> Self {
        Self {
            accept_all_changes_on_success: config.accept_all_changes_on_success,
            ensure_history: false,
        }
    }
}

/// Forces automatic change detection on and restores the previous setting
/// when dropped.
struct AutoDetectGuard<C: PersistenceContext> {
    context: C,
    previous: bool,
}

impl<C: PersistenceContext> AutoDetectGuard<C> {
    fn enable(context: C) -> Self {
        let previous = context.auto_detect_changes();
        context.set_auto_detect_changes(true);
        Self { context, previous }
    }
}

impl<C: PersistenceContext> Drop for AutoDetectGuard<C> {
    fn drop(&mut self) {
        self.context.set_auto_detect_changes(self.previous);
    }
}

/// Race a store round trip against a cancellation token.
async fn cancellable<F, O>(token: &CancellationToken, operation: F) -> AppResult<O>
where
    F: Future<Output = AppResult<O>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(AppError::cancelled("The operation was cancelled")),
        result = operation => result,
    }
}

/// Transaction and save lifecycle over one persistence context.
pub struct UnitOfWork<C: PersistenceContext> {
    context: C,
    config: UnitOfWorkConfig,
    registry: Arc<RepositoryRegistry<C>>,
    transaction: Option<Box<dyn ContextTransaction>>,
    state: TransactionState,
    cancellation: CancellationToken,
    closed: bool,
}

impl<C: PersistenceContext> std::fmt::Debug for UnitOfWork<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: PersistenceContext> UnitOfWork<C> {
    /// Create a unit of work with default configuration.
    pub fn new(context: C) -> Self {
        Self::with_config(context, UnitOfWorkConfig::default())
    }

    /// Create a unit of work; the configured command timeout is pushed to
    /// the context.
    pub fn with_config(context: C, config: UnitOfWorkConfig) -> Self {
        if let Some(timeout) = config.command_timeout() {
            context.set_command_timeout(Some(timeout));
        }
        Self {
            context,
            config,
            registry: Arc::new(RepositoryRegistry::new()),
            transaction: None,
            state: TransactionState::NoTransaction,
            cancellation: CancellationToken::new(),
            closed: false,
        }
    }

    /// Resolve custom repositories from `registry`.
    pub fn with_registry(mut self, registry: Arc<RepositoryRegistry<C>>) -> Self {
        self.registry = registry;
        self
    }

    /// Abort store round trips once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The owned context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// The configuration this unit of work was built with.
    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Save options derived from the configuration.
    pub fn default_save_options(&self) -> SaveOptions {
        SaveOptions::from(&self.config)
    }

    /// Generic repository for `T` over the owned context.
    pub fn repository<T: Entity>(&self) -> Repository<T, C> {
        Repository::new(self.context.clone())
    }

    /// A registered custom repository over the owned context.
    pub fn custom_repository<R: 'static>(&self) -> AppResult<R> {
        self.registry.resolve::<R>(self.context.clone())
    }

    /// Whether a transaction is active.
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Current transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Whether [`UnitOfWork::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Command timeout of the context.
    pub fn timeout(&self) -> Option<Duration> {
        self.context.command_timeout()
    }

    /// Set the command timeout of the context.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.context.set_command_timeout(timeout);
    }

    /// Whether there are pending changes. Change detection always runs.
    pub fn has_changes(&self) -> bool {
        let _detect = AutoDetectGuard::enable(self.context.clone());
        self.context.has_changes()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(AppError::invalid_state("The unit of work has been closed"));
        }
        Ok(())
    }

    fn ensure_can_begin(&self) -> AppResult<()> {
        if !self.state.can_begin() {
            return Err(AppError::invalid_state(
                "There's already an active transaction.",
            ));
        }
        Ok(())
    }

    /// Start a transaction. Fails when one is already active.
    pub async fn begin_transaction(&mut self, isolation_level: IsolationLevel) -> AppResult<()> {
        self.ensure_open()?;
        self.ensure_can_begin()?;
        let transaction = cancellable(
            &self.cancellation,
            self.context.begin_transaction(isolation_level),
        )
        .await?;
        debug!(transaction = %transaction.id(), %isolation_level, "Began transaction");
        self.transaction = Some(transaction);
        self.state = TransactionState::Active;
        Ok(())
    }

    /// Adopt a transaction started elsewhere on the same context. The unit of
    /// work then owns it: saves run inside it and `commit`/`rollback` end it.
    /// Fails when a transaction is already active.
    pub fn use_transaction(&mut self, transaction: Box<dyn ContextTransaction>) -> AppResult<()> {
        self.ensure_open()?;
        self.ensure_can_begin()?;
        debug!(
            transaction = %transaction.id(),
            isolation_level = %transaction.isolation_level(),
            "Adopted transaction"
        );
        self.transaction = Some(transaction);
        self.state = TransactionState::Active;
        Ok(())
    }

    /// Persist pending changes.
    ///
    /// Returns 0 without touching the store when nothing is pending.
    /// Otherwise a transaction is started if none is active and committed
    /// when rows were affected. A failure rolls back and is returned as is.
    pub async fn save_changes(&mut self, options: SaveOptions) -> AppResult<u64> {
        self.ensure_open()?;
        if !self.has_changes() {
            return Ok(0);
        }
        if self.transaction.is_none() {
            let isolation_level = self.config.isolation_level;
            self.begin_transaction(isolation_level).await?;
        }

        let _detect = AutoDetectGuard::enable(self.context.clone());
        match self.persist(options).await {
            Ok(affected) => {
                if affected > 0 {
                    self.commit().await?;
                }
                Ok(affected)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    /// Save with the configured defaults.
    pub async fn save(&mut self) -> AppResult<u64> {
        let options = self.default_save_options();
        self.save_changes(options).await
    }

    /// Persist pending changes and hand the transaction to `scope` instead of
    /// committing it.
    pub async fn save_changes_in(
        &mut self,
        scope: &mut TransactionScope,
        options: SaveOptions,
    ) -> AppResult<u64> {
        self.ensure_open()?;
        scope.ensure_active()?;
        if !self.has_changes() {
            return Ok(0);
        }
        if self.transaction.is_none() {
            let isolation_level = self.config.isolation_level;
            self.begin_transaction(isolation_level).await?;
        }

        let _detect = AutoDetectGuard::enable(self.context.clone());
        match self.persist(options).await {
            Ok(affected) => {
                if let Some(transaction) = self.transaction.take() {
                    scope.enlist(transaction);
                    self.state = TransactionState::NoTransaction;
                }
                Ok(affected)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn persist(&self, options: SaveOptions) -> AppResult<u64> {
        if options.ensure_history {
            let staged = self.context.ensure_auto_history()?;
            debug!(staged, "Staged auto history");
        }
        cancellable(
            &self.cancellation,
            self.context
                .save_changes(options.accept_all_changes_on_success),
        )
        .await
    }

    /// Commit the active transaction. On failure the transaction is rolled
    /// back and the commit error returned.
    pub async fn commit(&mut self) -> AppResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            return Err(AppError::invalid_state("There's no active transaction."));
        };
        match cancellable(&self.cancellation, transaction.commit()).await {
            Ok(()) => {
                debug!(transaction = %transaction.id(), "Committed transaction");
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(e) => {
                warn!(transaction = %transaction.id(), error = %e, "Commit failed, rolling back");
                if let Err(rollback) = transaction.rollback().await {
                    warn!(transaction = %transaction.id(), error = %rollback, "Rollback failed");
                }
                self.state = TransactionState::RolledBack;
                Err(e)
            }
        }
    }

    /// Roll back the active transaction, if any. Failures are logged, not
    /// returned.
    pub async fn rollback(&mut self) {
        let Some(mut transaction) = self.transaction.take() else {
            return;
        };
        match transaction.rollback().await {
            Ok(()) => debug!(transaction = %transaction.id(), "Rolled back transaction"),
            Err(e) => warn!(transaction = %transaction.id(), error = %e, "Rollback failed"),
        }
        self.state = TransactionState::RolledBack;
    }

    /// Detach every tracked entity.
    pub fn discard_changes(&self) {
        self.context.detach_all();
    }

    /// Run a raw command outside the change tracker.
    pub async fn execute_sql(&self, sql: &str, params: &[Value]) -> AppResult<u64> {
        self.ensure_open()?;
        ensure_sql(sql)?;
        cancellable(&self.cancellation, self.context.execute_sql(sql, params)).await
    }

    /// Run a raw query outside the change tracker.
    pub async fn from_sql<T: Entity>(&self, sql: &str, params: &[Value]) -> AppResult<Vec<T>> {
        self.ensure_open()?;
        ensure_sql(sql)?;
        cancellable(&self.cancellation, self.context.from_sql(sql, params)).await
    }

    /// Release any active transaction and close the context. Later calls do
    /// nothing.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.rollback().await;
        self.context.close().await
    }
}

impl<C: PersistenceContext> Drop for UnitOfWork<C> {
    fn drop(&mut self) {
        if let Some(transaction) = &self.transaction {
            warn!(
                transaction = %transaction.id(),
                "Unit of work dropped with an active transaction"
            );
        }
    }
}
