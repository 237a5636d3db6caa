//! Core type definitions used across the DataKit workspace.

pub mod pagination;
pub mod sorting;
pub mod state;
pub mod value;

pub use pagination::PagedList;
pub use sorting::SortDirection;
pub use state::{EntityState, IsolationLevel, TrackingMode, TransactionState};
pub use value::Value;
