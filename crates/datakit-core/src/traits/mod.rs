//! Core traits defined in `datakit-core` and implemented by backends.

pub mod context;
pub mod entity;
pub mod transaction;

pub use context::{PersistenceContext, UpdateFn};
pub use entity::{Entity, EntityKey};
pub use transaction::ContextTransaction;
