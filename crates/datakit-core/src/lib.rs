//! # datakit-core
//!
//! Core crate for DataKit. Contains the persistence-context contract,
//! the declarative query specification and its builder, configuration
//! schemas, shared value/paging/sorting types and the unified error system.
//!
//! This crate has **no** internal dependencies on other DataKit crates.

pub mod config;
pub mod error;
pub mod query;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
