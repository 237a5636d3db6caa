//! Generic repository over a persistence context.
//!
//! A [`Repository`] binds one entity type to one context handle. Reads
//! compile a query specification and execute it; writes only stage changes
//! on the context's change tracker until the owning unit of work saves.

pub mod registry;

use std::marker::PhantomData;

use tracing::debug;

use datakit_core::error::AppError;
use datakit_core::query::{Predicate, ProjectedQuery, Query, QueryBuilder};
use datakit_core::result::AppResult;
use datakit_core::traits::{Entity, EntityKey, PersistenceContext};
use datakit_core::types::{EntityState, PagedList, TrackingMode, Value};

use crate::compiler::QueryCompiler;

pub use registry::RepositoryRegistry;

/// Reject blank raw SQL before it reaches the store.
pub(crate) fn ensure_sql(sql: &str) -> AppResult<()> {
    if sql.trim().is_empty() {
        return Err(AppError::argument("SQL text must not be blank"));
    }
    Ok(())
}

/// Generic repository for `T`.
pub struct Repository<T, C> {
    context: C,
    compiler: QueryCompiler,
    _entity: PhantomData<fn() -> T>,
}

impl<T, C: Clone> Clone for Repository<T, C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            compiler: self.compiler,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, C: PersistenceContext> Repository<T, C> {
    /// Create a repository over `context`.
    pub fn new(context: C) -> Self {
        Self {
            context,
            compiler: QueryCompiler::new(),
            _entity: PhantomData,
        }
    }

    /// The context this repository works on.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// An empty query for `T`.
    pub fn query(&self) -> Query<T> {
        Query::new()
    }

    /// An empty projected query for `T`.
    pub fn projected_query<R>(&self) -> ProjectedQuery<T, R> {
        ProjectedQuery::new()
    }

    /// Run a query. With paging enabled the total row count is written to
    /// the query's paging state.
    pub async fn search(&self, query: &mut Query<T>) -> AppResult<Vec<T>> {
        let compiled = self.compiler.compile(&self.context, query).await?;
        let rows = self.context.fetch(compiled.plan()).await?;
        Ok(compiled.materialize(rows))
    }

    /// Run a projected query.
    pub async fn search_as<R>(&self, query: &mut ProjectedQuery<T, R>) -> AppResult<Vec<R>> {
        let compiled = self.compiler.compile_projected(&self.context, query).await?;
        let rows = self.context.fetch(compiled.plan()).await?;
        compiled.project(rows)
    }

    /// Run a query and wrap the rows with their paging information.
    pub async fn search_paged(&self, query: &mut Query<T>) -> AppResult<PagedList<T>> {
        let items = self.search(query).await?;
        let paging = *query.state().paging();
        let total_count = if paging.is_enabled() {
            paging.total_count
        } else {
            items.len() as i64
        };
        Ok(PagedList::new(
            items,
            paging.page_index,
            paging.page_size,
            total_count,
        ))
    }

    /// The only matching row, `None` when nothing matches. More than one
    /// match is an error.
    pub async fn single_or_default(&self, query: &mut Query<T>) -> AppResult<Option<T>> {
        single(self.search(query).await?)
    }

    /// The first matching row.
    pub async fn first_or_default(&self, query: &mut Query<T>) -> AppResult<Option<T>> {
        Ok(self.search(query).await?.into_iter().next())
    }

    /// The last matching row.
    pub async fn last_or_default(&self, query: &mut Query<T>) -> AppResult<Option<T>> {
        Ok(self.search(query).await?.pop())
    }

    /// Projected variant of [`Repository::single_or_default`].
    pub async fn single_or_default_as<R>(
        &self,
        query: &mut ProjectedQuery<T, R>,
    ) -> AppResult<Option<R>> {
        single(self.search_as(query).await?)
    }

    /// Projected variant of [`Repository::first_or_default`].
    pub async fn first_or_default_as<R>(
        &self,
        query: &mut ProjectedQuery<T, R>,
    ) -> AppResult<Option<R>> {
        Ok(self.search_as(query).await?.into_iter().next())
    }

    /// Projected variant of [`Repository::last_or_default`].
    pub async fn last_or_default_as<R>(
        &self,
        query: &mut ProjectedQuery<T, R>,
    ) -> AppResult<Option<R>> {
        Ok(self.search_as(query).await?.pop())
    }

    /// Load an entity by primary key and track it.
    pub async fn find(&self, key: impl Into<EntityKey>) -> AppResult<Option<T>> {
        self.context
            .find(&key.into(), TrackingMode::Tracked)
            .await
    }

    /// Whether any row matches.
    pub async fn any(&self, predicate: Option<Predicate<T>>) -> AppResult<bool> {
        Ok(self.count(predicate).await? > 0)
    }

    /// Number of matching rows.
    pub async fn count(&self, predicate: Option<Predicate<T>>) -> AppResult<u64> {
        self.context
            .count(&QueryCompiler::filtered(predicate))
            .await
    }

    /// Largest selected value among matching rows.
    pub async fn max<V, F>(&self, selector: F, predicate: Option<Predicate<T>>) -> AppResult<Option<V>>
    where
        V: Ord,
        F: Fn(&T) -> V,
    {
        Ok(self.rows(predicate).await?.iter().map(selector).max())
    }

    /// Smallest selected value among matching rows.
    pub async fn min<V, F>(&self, selector: F, predicate: Option<Predicate<T>>) -> AppResult<Option<V>>
    where
        V: Ord,
        F: Fn(&T) -> V,
    {
        Ok(self.rows(predicate).await?.iter().map(selector).min())
    }

    /// Sum of the selected values; `0` when nothing matches.
    pub async fn sum<F>(&self, selector: F, predicate: Option<Predicate<T>>) -> AppResult<f64>
    where
        F: Fn(&T) -> f64,
    {
        Ok(self.rows(predicate).await?.iter().map(selector).sum())
    }

    /// Mean of the selected values; `None` when nothing matches.
    pub async fn average<F>(&self, selector: F, predicate: Option<Predicate<T>>) -> AppResult<Option<f64>>
    where
        F: Fn(&T) -> f64,
    {
        let values: Vec<f64> = self.rows(predicate).await?.iter().map(selector).collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn rows(&self, predicate: Option<Predicate<T>>) -> AppResult<Vec<T>> {
        self.context
            .fetch(&QueryCompiler::filtered(predicate))
            .await
    }

    /// Stage an insert.
    pub fn add(&self, entity: T) -> AppResult<()> {
        self.context.add(entity)
    }

    /// Stage several inserts.
    pub fn add_range(&self, entities: impl IntoIterator<Item = T>) -> AppResult<()> {
        entities.into_iter().try_for_each(|entity| self.add(entity))
    }

    /// Stage an update. With property names, only those are written.
    pub fn update(&self, entity: T, properties: &[&str]) -> AppResult<()> {
        self.context.update(entity, properties)
    }

    /// Stage several whole-entity updates.
    pub fn update_range(&self, entities: impl IntoIterator<Item = T>) -> AppResult<()> {
        entities
            .into_iter()
            .try_for_each(|entity| self.update(entity, &[]))
    }

    /// Stage a delete.
    pub fn remove(&self, entity: T) -> AppResult<()> {
        self.context.remove(entity)
    }

    /// Stage several deletes.
    pub fn remove_range(&self, entities: impl IntoIterator<Item = T>) -> AppResult<()> {
        entities.into_iter().try_for_each(|entity| self.remove(entity))
    }

    /// Change-tracker state of an entity.
    pub fn entity_state(&self, entity: &T) -> EntityState {
        self.context.entity_state(entity)
    }

    /// Update every matching row in the store right away.
    pub async fn update_where<F>(&self, predicate: Predicate<T>, update: F) -> AppResult<u64>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let affected = self.context.update_where(&predicate, &update).await?;
        debug!(entity = T::NAME, affected, "Bulk update");
        Ok(affected)
    }

    /// Delete every matching row in the store right away.
    pub async fn remove_where(&self, predicate: Predicate<T>) -> AppResult<u64> {
        let affected = self.context.remove_where(&predicate).await?;
        debug!(entity = T::NAME, affected, "Bulk delete");
        Ok(affected)
    }

    /// Run a raw command.
    pub async fn execute_sql(&self, sql: &str, params: &[Value]) -> AppResult<u64> {
        ensure_sql(sql)?;
        self.context.execute_sql(sql, params).await
    }

    /// Run a raw query returning `T` rows.
    pub async fn from_sql(&self, sql: &str, params: &[Value]) -> AppResult<Vec<T>> {
        ensure_sql(sql)?;
        self.context.from_sql(sql, params).await
    }
}

fn single<R>(rows: Vec<R>) -> AppResult<Option<R>> {
    if rows.len() > 1 {
        return Err(AppError::invalid_state(
            "Sequence contains more than one matching element",
        ));
    }
    Ok(rows.into_iter().next())
}
