//! Store transaction handles.

use async_trait::async_trait;
use uuid::Uuid;

use crate::result::AppResult;
use crate::types::IsolationLevel;

/// A live store transaction.
///
/// Dropping a handle that was neither committed nor rolled back must
/// release it; backends roll back in that case.
#[async_trait]
pub trait ContextTransaction: Send + Sync {
    /// Transaction identifier.
    fn id(&self) -> Uuid;

    /// Isolation level the transaction was started with.
    fn isolation_level(&self) -> IsolationLevel;

    /// Vote phase used when the transaction is enlisted in an outer scope.
    /// A failure here means the later commit would fail.
    ///
    /// Returning `Ok` promises that `commit` will succeed. An outer scope
    /// commits its transactions one by one and cannot undo those already
    /// committed, so a backend whose commit can still fail after a
    /// successful prepare leaves the scope partially committed.
    async fn prepare(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Make the transaction's writes durable.
    async fn commit(&mut self) -> AppResult<()>;

    /// Undo the transaction's writes.
    async fn rollback(&mut self) -> AppResult<()>;
}
