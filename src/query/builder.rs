//! Fluent request builder.

use crate::query::ast::{ArtifactFn, FieldSpec, QueryRequest, Reducer, ReducerSpec};
use crate::query::dataset::{Dataset, DatasetError};
use crate::query::executor::{Executor, QueryResult};
use crate::query::errors::Result;
use crate::query::planner::QueryExplain;
use crate::query::Value;

/// Builds a [`QueryRequest`] one clause at a time.
///
/// ```
/// use runquery::query::{QueryBuilder, Value};
///
/// let request = QueryBuilder::new()
///     .select("id")
///     .select("config.lr")
///     .select_fn("final_loss", |ds| Ok(ds.column("loss")?.last().cloned().unwrap_or(Value::Null)))
///     .filter_eq("project", "vision")
///     .group_by("config.lr")
///     .build();
/// assert_eq!(request.select.len(), 3);
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    request: QueryRequest,
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a selected field (bare name or descriptor).
    pub fn select(mut self, field: impl Into<FieldSpec>) -> Self {
        self.request.select.push(field.into());
        self
    }

    /// Adds a deferred selection computed from each run's artifact.
    pub fn select_fn<F>(self, field: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync + 'static,
    {
        self.select(FieldSpec::function(field, ArtifactFn::new(func)))
    }

    /// Adds a filter descriptor.
    pub fn filter(mut self, spec: impl Into<FieldSpec>) -> Self {
        self.request.filter.push(spec.into());
        self
    }

    /// Adds `field = value`.
    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FieldSpec::compare(field, "=", value))
    }

    /// Adds `field <operator> value`.
    pub fn filter_op(self, field: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        self.filter(FieldSpec::compare(field, operator, value))
    }

    /// Adds a deferred boolean filter evaluated against each run's artifact.
    pub fn filter_fn<F>(self, field: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync + 'static,
    {
        self.filter(FieldSpec::function(field, ArtifactFn::new(func)))
    }

    /// Adds a group key.
    pub fn group_by(mut self, field: impl Into<FieldSpec>) -> Self {
        self.request.group_by.push(field.into());
        self
    }

    /// Adds a deferred group key computed from each run's artifact.
    pub fn group_by_fn<F>(self, field: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync + 'static,
    {
        self.group_by(FieldSpec::function(field, ArtifactFn::new(func)))
    }

    /// Reduces a grouped column with a built-in reducer (`mean`, `count`, ...).
    pub fn aggregate(mut self, column: impl Into<String>, reducer: impl Into<String>) -> Self {
        self.request
            .aggregate
            .insert(column.into(), ReducerSpec::Named(reducer.into()));
        self
    }

    /// Reduces a grouped column with a custom reducer.
    pub fn aggregate_with(mut self, column: impl Into<String>, reducer: Reducer) -> Self {
        self.request
            .aggregate
            .insert(column.into(), ReducerSpec::Callable(reducer));
        self
    }

    /// Finishes the request.
    pub fn build(self) -> QueryRequest {
        self.request
    }

    /// Executes the request.
    pub fn execute(self, executor: &Executor) -> Result<QueryResult> {
        executor.execute(&self.request)
    }

    /// Explains the request without executing it.
    pub fn explain(self, executor: &Executor) -> Result<QueryExplain> {
        executor.explain(&self.request)
    }
}
