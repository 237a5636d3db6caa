//! Declarative query specifications and their fluent builder.
//!
//! A [`Query`] describes a fetch of `T` rows; a [`ProjectedQuery`] describes
//! the same fetch mapped to `R` rows. Both share a [`QueryState`] and the
//! [`QueryBuilder`] methods, which consume and return the query so calls
//! chain:
//!
//! ```ignore
//! let mut query = Query::<User>::new()
//!     .and_filter(Predicate::new(|u: &User| u.age > 18))
//!     .order_by("name")
//!     .page(Some(1), Some(10));
//! ```

use std::fmt;

use crate::query::paging::{Paging, Topping};
use crate::query::predicate::Predicate;
use crate::query::selector::{KeySelector, Projection};
use crate::query::sorting::Sorting;
use crate::types::{SortDirection, TrackingMode, Value};

/// A navigation path to eager-load, e.g. `"orders.lines"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncludePath(String);

impl IncludePath {
    /// The path text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments separated by `.`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for IncludePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a query carries except its projection.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    predicate: Predicate<T>,
    includes: Vec<IncludePath>,
    sortings: Vec<Sorting<T>>,
    tracking: TrackingMode,
    ignore_query_filters: bool,
    paging: Paging,
    topping: Topping,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            predicate: Predicate::always(),
            includes: Vec::new(),
            sortings: Vec::new(),
            tracking: TrackingMode::default(),
            ignore_query_filters: false,
            paging: Paging::default(),
            topping: Topping::default(),
        }
    }
}

impl<T> QueryState<T> {
    /// The combined predicate.
    pub fn predicate(&self) -> &Predicate<T> {
        &self.predicate
    }

    /// Include paths in declaration order.
    pub fn includes(&self) -> &[IncludePath] {
        &self.includes
    }

    /// Sort directives in declaration order.
    pub fn sortings(&self) -> &[Sorting<T>] {
        &self.sortings
    }

    /// Requested tracking mode.
    pub fn tracking(&self) -> TrackingMode {
        self.tracking
    }

    /// Whether global query filters are bypassed.
    pub fn ignore_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    /// Paging parameters.
    pub fn paging(&self) -> &Paging {
        &self.paging
    }

    /// Topping parameters.
    pub fn topping(&self) -> &Topping {
        &self.topping
    }

    /// Record the row count of the unpaged query.
    pub fn set_total_count(&mut self, total_count: i64) {
        self.paging.total_count = total_count;
    }
}

impl<T: 'static> QueryState<T> {
    // The default predicate is an unstarted identity: the first AND/OR
    // replaces it instead of combining with `true`.
    fn and_filter(&mut self, predicate: Predicate<T>) {
        let current = std::mem::take(&mut self.predicate);
        self.predicate = current.and(predicate);
    }

    fn or_filter(&mut self, predicate: Predicate<T>) {
        let current = std::mem::take(&mut self.predicate);
        self.predicate = if current.is_always() {
            predicate
        } else {
            current.or(predicate)
        };
    }

    fn push_field(&mut self, field: &str, direction: SortDirection) {
        let field = field.trim();
        if !field.is_empty() {
            self.sortings.push(Sorting::by_field(field, direction));
        }
    }
}

/// Fluent builder shared by [`Query`] and [`ProjectedQuery`].
pub trait QueryBuilder<T: 'static>: Sized {
    /// Shared state.
    fn state(&self) -> &QueryState<T>;

    /// Shared state, mutably.
    fn state_mut(&mut self) -> &mut QueryState<T>;

    /// Select tracked or no-tracking results.
    fn use_tracking(mut self, tracking: TrackingMode) -> Self {
        self.state_mut().tracking = tracking;
        self
    }

    /// Bypass global query filters.
    fn use_ignore_query_filters(mut self, ignore: bool) -> Self {
        self.state_mut().ignore_query_filters = ignore;
        self
    }

    /// AND a predicate onto the current one; `None` is a no-op.
    fn and_filter(mut self, predicate: impl Into<Option<Predicate<T>>>) -> Self {
        if let Some(predicate) = predicate.into() {
            self.state_mut().and_filter(predicate);
        }
        self
    }

    /// OR a predicate onto the current one; `None` is a no-op.
    fn or_filter(mut self, predicate: impl Into<Option<Predicate<T>>>) -> Self {
        if let Some(predicate) = predicate.into() {
            self.state_mut().or_filter(predicate);
        }
        self
    }

    /// Append include paths in order. Blank paths are skipped.
    fn include<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let includes = &mut self.state_mut().includes;
        includes.extend(
            paths
                .into_iter()
                .map(|p| p.as_ref().trim().to_string())
                .filter(|p| !p.is_empty())
                .map(IncludePath),
        );
        self
    }

    /// Append an ascending sort on a named field. Blank names are ignored.
    fn order_by(mut self, field: &str) -> Self {
        self.state_mut().push_field(field, SortDirection::Ascending);
        self
    }

    /// Alias of [`QueryBuilder::order_by`]; priority follows call order.
    fn then_by(self, field: &str) -> Self {
        self.order_by(field)
    }

    /// Append a descending sort on a named field. Blank names are ignored.
    fn order_by_descending(mut self, field: &str) -> Self {
        self.state_mut().push_field(field, SortDirection::Descending);
        self
    }

    /// Alias of [`QueryBuilder::order_by_descending`].
    fn then_by_descending(self, field: &str) -> Self {
        self.order_by_descending(field)
    }

    /// Append an ascending sort on a key selector.
    fn order_by_key<F, V>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.state_mut().sortings.push(Sorting::by_key(
            KeySelector::new(selector),
            SortDirection::Ascending,
        ));
        self
    }

    /// Alias of [`QueryBuilder::order_by_key`].
    fn then_by_key<F, V>(self, selector: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.order_by_key(selector)
    }

    /// Append a descending sort on a key selector.
    fn order_by_key_descending<F, V>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.state_mut().sortings.push(Sorting::by_key(
            KeySelector::new(selector),
            SortDirection::Descending,
        ));
        self
    }

    /// Alias of [`QueryBuilder::order_by_key_descending`].
    fn then_by_key_descending<F, V>(self, selector: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.order_by_key_descending(selector)
    }

    /// Set the page window. Last call wins; `None` in either slot disables
    /// paging.
    fn page(mut self, page_index: Option<i64>, page_size: Option<i64>) -> Self {
        let paging = &mut self.state_mut().paging;
        paging.page_index = page_index;
        paging.page_size = page_size;
        self
    }

    /// Set the top-N limit. `None` disables it.
    fn top(mut self, top_rows: Option<i64>) -> Self {
        self.state_mut().topping.top_rows = top_rows;
        self
    }
}

/// A query returning `T` rows, optionally reshaped by a `T -> T` projection.
#[derive(Debug, Clone)]
pub struct Query<T> {
    state: QueryState<T>,
    selector: Option<Projection<T, T>>,
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            state: QueryState::default(),
            selector: None,
        }
    }
}

impl<T: 'static> Query<T> {
    /// An empty query matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the same-type projection.
    pub fn select<F>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        self.selector = Some(Projection::new(selector));
        self
    }

    /// Switch to a different result type, carrying all other state over.
    pub fn select_as<R, F>(self, selector: F) -> ProjectedQuery<T, R>
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        ProjectedQuery {
            state: self.state,
            selector: Some(Projection::new(selector)),
        }
    }

    /// The projection, if any.
    pub fn selector(&self) -> Option<&Projection<T, T>> {
        self.selector.as_ref()
    }
}

impl<T: 'static> QueryBuilder<T> for Query<T> {
    fn state(&self) -> &QueryState<T> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut QueryState<T> {
        &mut self.state
    }
}

/// A query returning `R` rows. Execution requires a projection.
#[derive(Debug, Clone)]
pub struct ProjectedQuery<T, R> {
    state: QueryState<T>,
    selector: Option<Projection<T, R>>,
}

impl<T, R> Default for ProjectedQuery<T, R> {
    fn default() -> Self {
        Self {
            state: QueryState::default(),
            selector: None,
        }
    }
}

impl<T: 'static, R> ProjectedQuery<T, R> {
    /// An empty projected query. A selector must be set before it runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the projection.
    pub fn select<F>(mut self, selector: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.selector = Some(Projection::new(selector));
        self
    }

    /// The projection, if any.
    pub fn selector(&self) -> Option<&Projection<T, R>> {
        self.selector.as_ref()
    }
}

impl<T: 'static, R> QueryBuilder<T> for ProjectedQuery<T, R> {
    fn state(&self) -> &QueryState<T> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut QueryState<T> {
        &mut self.state
    }
}
