//! Saving several units of work atomically.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use datakit_core::config::UnitOfWorkConfig;
use datakit_core::result::AppResult;
use datakit_core::traits::PersistenceContext;

use super::scope::TransactionScope;
use super::{SaveOptions, UnitOfWork};

/// Object-safe save surface, so units of work over different contexts can
/// be saved together.
#[async_trait]
pub trait SaveChanges: Send {
    /// Persist and commit on its own.
    async fn save_changes(&mut self, options: SaveOptions) -> AppResult<u64>;

    /// Persist and enlist the transaction in `scope`.
    async fn save_changes_in(
        &mut self,
        scope: &mut TransactionScope,
        options: SaveOptions,
    ) -> AppResult<u64>;

    /// Outer scope budget this unit was configured with.
    fn scope_timeout(&self) -> Option<Duration> {
        None
    }
}

#[async_trait]
impl<C: PersistenceContext> SaveChanges for UnitOfWork<C> {
    async fn save_changes(&mut self, options: SaveOptions) -> AppResult<u64> {
        UnitOfWork::save_changes(self, options).await
    }

    async fn save_changes_in(
        &mut self,
        scope: &mut TransactionScope,
        options: SaveOptions,
    ) -> AppResult<u64> {
        UnitOfWork::save_changes_in(self, scope, options).await
    }

    fn scope_timeout(&self) -> Option<Duration> {
        self.config().scope_timeout()
    }
}

/// Options of [`save_changes_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiSaveOptions {
    /// Wrap every save in one outer transaction scope.
    pub use_transaction: bool,
    /// Time budget of the outer scope. When absent the tightest timeout
    /// configured on the units applies, and the scope is unbounded if none
    /// has one.
    pub timeout: Option<Duration>,
    /// Options of each individual save.
    pub save: SaveOptions,
}

impl Default for MultiSaveOptions {
    fn default() -> Self {
        Self {
            use_transaction: true,
            timeout: None,
            save: SaveOptions::default(),
        }
    }
}

impl From<&UnitOfWorkConfig> for MultiSaveOptions {
    fn from(config: &UnitOfWorkConfig) -> Self {
        Self {
            use_transaction: true,
            timeout: config.scope_timeout(),
            save: SaveOptions::from(config),
        }
    }
}

/// Save several units of work and return the total affected row count.
///
/// With `use_transaction` every unit enlists its transaction in one
/// [`TransactionScope`]; either all commit or all roll back. Without it the
/// units save one after another and earlier saves stay committed when a
/// later one fails.
pub async fn save_changes_all(
    units: &mut [&mut dyn SaveChanges],
    options: MultiSaveOptions,
) -> AppResult<u64> {
    if units.is_empty() {
        return Ok(0);
    }

    if !options.use_transaction {
        let mut affected = 0;
        for unit in units.iter_mut() {
            affected += unit.save_changes(options.save).await?;
        }
        return Ok(affected);
    }

    let timeout = options
        .timeout
        .or_else(|| units.iter().filter_map(|unit| unit.scope_timeout()).min())
        .unwrap_or(Duration::MAX);
    let mut scope = TransactionScope::new(timeout);
    info!(scope = %scope.id(), units = units.len(), "Saving units of work in one scope");

    let mut affected = 0;
    for unit in units.iter_mut() {
        match unit.save_changes_in(&mut scope, options.save).await {
            Ok(rows) => affected += rows,
            Err(e) => {
                warn!(scope = %scope.id(), error = %e, "Save failed, disposing scope");
                scope.dispose().await;
                return Err(e);
            }
        }
    }

    scope.complete().await?;
    Ok(affected)
}
