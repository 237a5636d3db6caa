//! Typed registry of custom repository constructors.
//!
//! Custom repositories are registered once, when the application is
//! composed, and resolved by type from a unit of work.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;

use datakit_core::error::AppError;
use datakit_core::result::AppResult;
use datakit_core::traits::PersistenceContext;

type Constructor<C> = Box<dyn Fn(C) -> Box<dyn Any + Send> + Send + Sync>;

/// Constructors of custom repositories keyed by repository type.
pub struct RepositoryRegistry<C> {
    constructors: HashMap<TypeId, (&'static str, Constructor<C>)>,
}

impl<C> Default for RepositoryRegistry<C> {
    fn default() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for RepositoryRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &names)
            .finish()
    }
}

impl<C: PersistenceContext> RepositoryRegistry<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to build `R` from a context. A later registration of the
    /// same type replaces the earlier one.
    pub fn register<R, F>(mut self, constructor: F) -> Self
    where
        R: Send + 'static,
        F: Fn(C) -> R + Send + Sync + 'static,
    {
        let build: Constructor<C> =
            Box::new(move |context: C| -> Box<dyn Any + Send> { Box::new(constructor(context)) });
        self.constructors
            .insert(TypeId::of::<R>(), (type_name::<R>(), build));
        self
    }

    /// Whether `R` is registered.
    pub fn contains<R: 'static>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<R>())
    }

    /// Number of registered repositories.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Build `R` over `context`.
    pub fn resolve<R: 'static>(&self, context: C) -> AppResult<R> {
        let (name, constructor) = self.constructors.get(&TypeId::of::<R>()).ok_or_else(|| {
            AppError::not_found(format!("No repository registered for {}", type_name::<R>()))
        })?;
        constructor(context)
            .downcast::<R>()
            .map(|repository| *repository)
            .map_err(|_| AppError::internal(format!("Registered constructor for {name} built another type")))
    }
}
