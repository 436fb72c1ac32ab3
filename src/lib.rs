//! Query engine for experiment-run records.
//!
//! Runs live in a relational table whose fields are plain columns, keys
//! nested inside JSON blobs, or values only computable from a per-run
//! artifact (a metric trajectory on disk). [`query::Executor`] compiles the
//! relational part of a request into one SQL statement, evaluates caller
//! functions against each run's artifact for the rest, and reconciles both
//! into a single [`query::Frame`].
//!
//! Grouped columns are collected into lists, never reduced, unless the
//! request names a reducer.

#![warn(missing_docs)]

pub mod config;
pub mod query;
pub mod store;

pub use config::QueryOptions;
pub use query::{Executor, Frame, QueryBuilder, QueryError, QueryRequest, Result, Value};
