//! Query compilation.
//!
//! The compiler turns a query specification into a [`QueryPlan`] in a fixed
//! order: base set, includes, filter, sort, top, paging, projection. When
//! paging is enabled it runs a count query over the base set, includes and
//! filter only, and writes the total back into the query.

use tracing::debug;

use datakit_core::error::AppError;
use datakit_core::query::{
    Predicate, ProjectedQuery, Projection, Query, QueryBuilder, QueryPlan, QuerySource, QueryState,
    QueryStep,
};
use datakit_core::result::AppResult;
use datakit_core::traits::{Entity, PersistenceContext};

/// A compiled plan plus the projection applied after fetching.
pub struct CompiledQuery<T, R> {
    plan: QueryPlan<T>,
    projection: Option<Projection<T, R>>,
}

impl<T, R> CompiledQuery<T, R> {
    /// The plan to fetch with.
    pub fn plan(&self) -> &QueryPlan<T> {
        &self.plan
    }

    /// Whether a projection runs after the fetch.
    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    /// Steps in application order, with `select` last when projecting.
    pub fn describe(&self) -> Vec<String> {
        let mut steps = self.plan.describe();
        if self.projection.is_some() {
            steps.push("select".to_string());
        }
        steps
    }

    /// Map fetched rows through the projection.
    pub fn project(&self, rows: Vec<T>) -> AppResult<Vec<R>> {
        let projection = self
            .projection
            .as_ref()
            .ok_or_else(|| AppError::configuration("A selector is required to project rows"))?;
        Ok(rows.iter().map(|row| projection.project(row)).collect())
    }
}

impl<T> CompiledQuery<T, T> {
    /// Rows as the query returns them: projected when a same-type selector
    /// is set, otherwise unchanged.
    pub fn materialize(&self, rows: Vec<T>) -> Vec<T> {
        match &self.projection {
            Some(projection) => rows.iter().map(|row| projection.project(row)).collect(),
            None => rows,
        }
    }
}

/// Builds plans from query specifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    /// Create a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Plan over the base set with an optional filter; used by aggregate
    /// reads that take a predicate instead of a query.
    pub fn filtered<T: 'static>(predicate: Option<Predicate<T>>) -> QueryPlan<T> {
        let mut plan = QueryPlan::new(QuerySource::default());
        if let Some(predicate) = predicate.filter(|p| !p.is_always()) {
            plan.push(QueryStep::Filter(predicate));
        }
        plan
    }

    /// Compile a `T`-returning query.
    pub async fn compile<T, C>(
        &self,
        context: &C,
        query: &mut Query<T>,
    ) -> AppResult<CompiledQuery<T, T>>
    where
        T: Entity,
        C: PersistenceContext,
    {
        let plan = self.build(context, query.state_mut()).await?;
        Ok(CompiledQuery {
            plan,
            projection: query.selector().cloned(),
        })
    }

    /// Compile an `R`-returning query. Fails before running anything when
    /// no selector is set.
    pub async fn compile_projected<T, R, C>(
        &self,
        context: &C,
        query: &mut ProjectedQuery<T, R>,
    ) -> AppResult<CompiledQuery<T, R>>
    where
        T: Entity,
        C: PersistenceContext,
    {
        let projection = query
            .selector()
            .cloned()
            .ok_or_else(|| AppError::configuration("A selector is required for a projected query"))?;
        let plan = self.build(context, query.state_mut()).await?;
        Ok(CompiledQuery {
            plan,
            projection: Some(projection),
        })
    }

    async fn build<T, C>(&self, context: &C, state: &mut QueryState<T>) -> AppResult<QueryPlan<T>>
    where
        T: Entity,
        C: PersistenceContext,
    {
        let mut plan = Self::filter_plan(state);

        if !state.sortings().is_empty() {
            plan.push(QueryStep::Sort(state.sortings().to_vec()));
        }

        if state.topping().is_enabled() {
            plan.push(QueryStep::Take(state.topping().take()));
        }

        let paging = *state.paging();
        if paging.is_enabled() {
            let count_plan = Self::filter_plan(state);
            let total = context.count(&count_plan).await?;
            state.set_total_count(i64::try_from(total).unwrap_or(i64::MAX));
            plan.push(QueryStep::Skip(paging.skip()));
            plan.push(QueryStep::Take(paging.take()));
        }

        debug!(
            entity = T::NAME,
            steps = ?plan.describe(),
            total_count = state.paging().total_count,
            "Compiled query"
        );
        Ok(plan)
    }

    /// Base set, includes and filter: the part shared with the count query.
    fn filter_plan<T: 'static>(state: &QueryState<T>) -> QueryPlan<T> {
        let mut plan = QueryPlan::new(QuerySource {
            tracking: state.tracking(),
            ignore_query_filters: state.ignore_query_filters(),
        });
        for path in state.includes() {
            plan.push(QueryStep::Include(path.clone()));
        }
        if !state.predicate().is_always() {
            plan.push(QueryStep::Filter(state.predicate().clone()));
        }
        plan
    }
}
