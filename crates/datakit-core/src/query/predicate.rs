//! Composable entity predicates.

use std::fmt;
use std::sync::Arc;

type PredicateFn<T> = dyn Fn(&T) -> bool + Send + Sync;

/// A boolean condition over an entity.
///
/// Predicates are opaque to the compiler. Backends that cannot translate a
/// closure evaluate it in-process against materialized rows.
pub struct Predicate<T> {
    inner: Option<Arc<PredicateFn<T>>>,
}

impl<T> Predicate<T> {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Some(Arc::new(f)),
        }
    }

    /// The identity predicate that matches every row.
    pub fn always() -> Self {
        Self { inner: None }
    }

    /// Whether this predicate is the identity predicate.
    pub fn is_always(&self) -> bool {
        self.inner.is_none()
    }

    /// Evaluate against an entity.
    pub fn matches(&self, entity: &T) -> bool {
        self.inner.as_ref().is_none_or(|f| f(entity))
    }
}

impl<T: 'static> Predicate<T> {
    /// Logical AND.
    pub fn and(self, other: Predicate<T>) -> Self {
        match (self.inner, other.inner) {
            (None, rhs) => Self { inner: rhs },
            (lhs, None) => Self { inner: lhs },
            (Some(lhs), Some(rhs)) => Self::new(move |e| lhs(e) && rhs(e)),
        }
    }

    /// Logical OR.
    ///
    /// The identity predicate is `true`, so OR-ing anything onto it still
    /// matches every row.
    pub fn or(self, other: Predicate<T>) -> Self {
        match (self.inner, other.inner) {
            (None, _) | (_, None) => Self::always(),
            (Some(lhs), Some(rhs)) => Self::new(move |e| lhs(e) || rhs(e)),
        }
    }

    /// Logical NOT.
    pub fn not(self) -> Self {
        match self.inner {
            None => Self::new(|_| false),
            Some(f) => Self::new(move |e| !f(e)),
        }
    }
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Predicate<T> {
    fn default() -> Self {
        Self::always()
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_always() {
            write!(f, "Predicate(true)")
        } else {
            write!(f, "Predicate(<fn>)")
        }
    }
}
