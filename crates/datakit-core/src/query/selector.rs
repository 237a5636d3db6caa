//! Key selectors and projections.

use std::fmt;
use std::sync::Arc;

use crate::types::Value;

/// Extracts a sort key from an entity.
pub struct KeySelector<T> {
    f: Arc<dyn Fn(&T) -> Value + Send + Sync>,
}

impl<T> KeySelector<T> {
    /// Wrap a closure returning anything convertible into a [`Value`].
    pub fn new<F, V>(f: F) -> Self
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self {
            f: Arc::new(move |e| f(e).into()),
        }
    }

    /// Evaluate the selector.
    pub fn key(&self, entity: &T) -> Value {
        (self.f)(entity)
    }
}

impl<T> Clone for KeySelector<T> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T> fmt::Debug for KeySelector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySelector(<fn>)")
    }
}

/// Maps an entity to a result row.
pub struct Projection<T, R> {
    f: Arc<dyn Fn(&T) -> R + Send + Sync>,
}

impl<T, R> Projection<T, R> {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Apply the projection.
    pub fn project(&self, entity: &T) -> R {
        (self.f)(entity)
    }
}

impl<T, R> Clone for Projection<T, R> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T, R> fmt::Debug for Projection<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Projection(<fn>)")
    }
}
