//! # datakit-database
//!
//! Query compilation, the unit of work, generic repositories and the
//! in-memory persistence backend.

pub mod compiler;
pub mod memory;
pub mod repository;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod test_support;

pub use compiler::{CompiledQuery, QueryCompiler};
pub use memory::{MemoryContext, MemoryStore};
pub use repository::{Repository, RepositoryRegistry};
pub use unit_of_work::{
    MultiSaveOptions, SaveChanges, SaveOptions, TransactionScope, UnitOfWork, save_changes_all,
};
