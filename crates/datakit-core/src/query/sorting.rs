//! Sort directives.

use std::cmp::Ordering;

use crate::query::selector::KeySelector;
use crate::types::{SortDirection, Value};

/// What a sort directive orders by.
#[derive(Debug, Clone)]
pub enum SortKey<T> {
    /// A typed key selector.
    Selector(KeySelector<T>),
    /// A field name resolved against the entity at execution.
    Field(String),
}

/// One entry of a multi-key sort.
#[derive(Debug, Clone)]
pub struct Sorting<T> {
    /// The key to sort by.
    pub key: SortKey<T>,
    /// Sort direction.
    pub direction: SortDirection,
}

impl<T> Sorting<T> {
    /// Sort by a key selector.
    pub fn by_key(selector: KeySelector<T>, direction: SortDirection) -> Self {
        Self {
            key: SortKey::Selector(selector),
            direction,
        }
    }

    /// Sort by a named field.
    pub fn by_field(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            key: SortKey::Field(field.into()),
            direction,
        }
    }

    /// The field name, when this directive sorts by name.
    pub fn field_name(&self) -> Option<&str> {
        match &self.key {
            SortKey::Field(name) => Some(name),
            SortKey::Selector(_) => None,
        }
    }
}

/// Compare two precomputed key rows directive by directive.
///
/// `a[i]` and `b[i]` are the keys of directive `i`; the first non-equal
/// directive decides, later directives only break ties.
pub fn compare_keys<T>(sortings: &[Sorting<T>], a: &[Value], b: &[Value]) -> Ordering {
    sortings
        .iter()
        .zip(a.iter().zip(b.iter()))
        .map(|(sorting, (x, y))| sorting.direction.apply(x.cmp(y)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
