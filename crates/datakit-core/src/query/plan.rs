//! Executable query plans.
//!
//! A [`QueryPlan`] is the ordered list of operations the compiler derived
//! from a query specification. Backends either translate the steps or run
//! them in-process with [`QueryPlan::apply`]; in both cases steps must be
//! honoured in order.

use std::fmt;

use crate::query::predicate::Predicate;
use crate::query::sorting::{SortKey, Sorting, compare_keys};
use crate::query::specification::IncludePath;
use crate::result::AppResult;
use crate::traits::entity::{Entity, document_field};
use crate::types::{SortDirection, TrackingMode, Value};

/// How the base set is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuerySource {
    /// Tracked or snapshot results.
    pub tracking: TrackingMode,
    /// Skip global query filters.
    pub ignore_query_filters: bool,
}

/// One operation of a plan.
pub enum QueryStep<T> {
    /// Eager-load a navigation path.
    Include(IncludePath),
    /// Keep rows matching the predicate.
    Filter(Predicate<T>),
    /// Stable multi-key sort.
    Sort(Vec<Sorting<T>>),
    /// Drop the first N rows.
    Skip(usize),
    /// Keep at most N rows.
    Take(usize),
}

impl<T> Clone for QueryStep<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Include(path) => Self::Include(path.clone()),
            Self::Filter(predicate) => Self::Filter(predicate.clone()),
            Self::Sort(sortings) => Self::Sort(
                sortings
                    .iter()
                    .map(|s| Sorting {
                        key: match &s.key {
                            SortKey::Selector(selector) => SortKey::Selector(selector.clone()),
                            SortKey::Field(name) => SortKey::Field(name.clone()),
                        },
                        direction: s.direction,
                    })
                    .collect(),
            ),
            Self::Skip(n) => Self::Skip(*n),
            Self::Take(n) => Self::Take(*n),
        }
    }
}

impl<T> fmt::Display for QueryStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include(path) => write!(f, "include({path})"),
            Self::Filter(predicate) if predicate.is_always() => write!(f, "filter(true)"),
            Self::Filter(_) => write!(f, "filter"),
            Self::Sort(sortings) => {
                let keys: Vec<String> = sortings
                    .iter()
                    .map(|s| {
                        let dir = match s.direction {
                            SortDirection::Ascending => "asc",
                            SortDirection::Descending => "desc",
                        };
                        match &s.key {
                            SortKey::Field(name) => format!("{name} {dir}"),
                            SortKey::Selector(_) => format!("<key> {dir}"),
                        }
                    })
                    .collect();
                write!(f, "sort({})", keys.join(", "))
            }
            Self::Skip(n) => write!(f, "skip({n})"),
            Self::Take(n) => write!(f, "take({n})"),
        }
    }
}

/// An ordered, backend-neutral description of a fetch.
pub struct QueryPlan<T> {
    source: QuerySource,
    steps: Vec<QueryStep<T>>,
}

impl<T> Clone for QueryPlan<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            steps: self.steps.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryPlan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("source", &self.source)
            .field("steps", &self.describe())
            .finish()
    }
}

impl<T> QueryPlan<T> {
    /// A plan over the whole base set.
    pub fn new(source: QuerySource) -> Self {
        Self {
            source,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn push(&mut self, step: QueryStep<T>) {
        self.steps.push(step);
    }

    /// Base-set selection.
    pub fn source(&self) -> QuerySource {
        self.source
    }

    /// Steps in application order.
    pub fn steps(&self) -> &[QueryStep<T>] {
        &self.steps
    }

    /// Include paths in declaration order.
    pub fn includes(&self) -> impl Iterator<Item = &IncludePath> {
        self.steps.iter().filter_map(|step| match step {
            QueryStep::Include(path) => Some(path),
            _ => None,
        })
    }

    /// Human-readable step list, e.g. `["filter", "sort(name asc)", "take(10)"]`.
    pub fn describe(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }
}

impl<T: Entity> QueryPlan<T> {
    /// Run every row-shaping step in-process, in order.
    ///
    /// Include steps are left to the backend that materialized `rows`.
    pub fn apply(&self, rows: Vec<T>) -> AppResult<Vec<T>> {
        let mut rows = rows;
        for step in &self.steps {
            rows = match step {
                QueryStep::Include(_) => rows,
                QueryStep::Filter(predicate) if predicate.is_always() => rows,
                QueryStep::Filter(predicate) => {
                    rows.into_iter().filter(|row| predicate.matches(row)).collect()
                }
                QueryStep::Sort(sortings) => sort_rows(rows, sortings)?,
                QueryStep::Skip(n) => rows.into_iter().skip(*n).collect(),
                QueryStep::Take(n) => rows.into_iter().take(*n).collect(),
            };
        }
        Ok(rows)
    }

    /// Count the rows the plan yields.
    pub fn count(&self, rows: Vec<T>) -> AppResult<u64> {
        Ok(self.apply(rows)?.len() as u64)
    }
}

/// Stable multi-key sort.
///
/// Keys are computed once per row; rows tied on every directive keep their
/// original relative order.
pub fn sort_rows<T: Entity>(rows: Vec<T>, sortings: &[Sorting<T>]) -> AppResult<Vec<T>> {
    if sortings.is_empty() {
        return Ok(rows);
    }
    let needs_document = sortings
        .iter()
        .any(|s| matches!(s.key, SortKey::Field(_)));

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let document = if needs_document {
            Some(serde_json::to_value(&row)?)
        } else {
            None
        };
        let mut keys = Vec::with_capacity(sortings.len());
        for sorting in sortings {
            let key = match (&sorting.key, &document) {
                (SortKey::Selector(selector), _) => selector.key(&row),
                (SortKey::Field(name), Some(document)) => document_field(document, name)?,
                (SortKey::Field(_), None) => Value::Null,
            };
            keys.push(key);
        }
        keyed.push((keys, row));
    }

    keyed.sort_by(|(a, _), (b, _)| compare_keys(sortings, a, b));
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}
