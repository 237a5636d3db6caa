//! # DataKit
//!
//! A data-access layer built from three pieces:
//!
//! - **Query specifications**: a fluent, declarative description of a fetch
//!   (filter, includes, sorting, paging, top, projection, tracking).
//! - **Repositories**: per-entity reads, aggregates and staged writes that
//!   compile specifications against a persistence context.
//! - **Units of work**: transaction and save lifecycle over one context,
//!   plus atomic saves across several contexts.
//!
//! ```ignore
//! use datakit::prelude::*;
//!
//! let store = MemoryStore::new();
//! let mut uow = UnitOfWork::new(store.context());
//! let users = uow.repository::<User>();
//!
//! let mut query = users
//!     .query()
//!     .and_filter(Predicate::new(|u: &User| u.age > 18))
//!     .order_by("name")
//!     .page(Some(1), Some(10));
//! let page = users.search(&mut query).await?;
//! let total = query.state().paging().total_count;
//! ```

pub mod logging;

pub use datakit_core;
pub use datakit_database;

/// Everything needed for day-to-day use.
pub mod prelude {
    pub use datakit_core::config::{DataKitConfig, LogFormat, LoggingConfig, UnitOfWorkConfig};
    pub use datakit_core::query::{Predicate, ProjectedQuery, Query, QueryBuilder};
    pub use datakit_core::traits::{ContextTransaction, Entity, EntityKey, PersistenceContext};
    pub use datakit_core::types::{
        EntityState, IsolationLevel, PagedList, SortDirection, TrackingMode, TransactionState,
        Value,
    };
    pub use datakit_core::{AppError, AppResult, ErrorKind};
    pub use datakit_database::memory::{AutoHistory, MemoryContext, MemoryStore, SqlHandler};
    pub use datakit_database::{
        MultiSaveOptions, Repository, RepositoryRegistry, SaveChanges, SaveOptions,
        TransactionScope, UnitOfWork, save_changes_all,
    };
}
