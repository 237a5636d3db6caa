//! Query specifications, their building blocks and executable plans.

pub mod paging;
pub mod plan;
pub mod predicate;
pub mod selector;
pub mod sorting;
pub mod specification;

pub use paging::{Paging, Topping};
pub use plan::{QueryPlan, QuerySource, QueryStep};
pub use predicate::Predicate;
pub use selector::{KeySelector, Projection};
pub use sorting::{SortKey, Sorting};
pub use specification::{IncludePath, ProjectedQuery, Query, QueryBuilder, QueryState};
