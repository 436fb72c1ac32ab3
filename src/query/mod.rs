#![forbid(unsafe_code)]

//! Query compilation and result reconciliation over experiment runs.
//!
//! A request flows through the pipeline
//!
//! ```text
//! normalize -> compile -> store -> [artifact stage] -> reconcile -> Frame
//! ```
//!
//! Relational and nested-blob fields are answered by one SQL statement.
//! Fields, filters and group keys that need a run's artifact are deferred and
//! resolved per run after the statement has executed.

/// Loading run artifacts into datasets.
pub mod artifact;

/// Caller-facing request shapes and canonical field descriptors.
pub mod ast;

/// Fluent request construction.
pub mod builder;

/// In-memory tabular data handed to caller functions.
pub mod dataset;

/// Error taxonomy.
pub mod errors;

/// Pipeline driver.
pub mod executor;

/// Result frame.
pub mod frame;

/// Named built-in artifact functions and reducers.
pub mod functions;

/// Field descriptor normalization.
pub mod normalize;

/// Statement compilation and aggregation planning.
///
/// Turns descriptors into a single `SELECT ... FROM runs` statement plus the
/// bookkeeping needed by later stages.
pub mod planner;

/// Performance profiling for pipeline phases.
///
/// Collects timing and count statistics when `RUNQUERY_PROFILE` is set.
pub mod profile;

/// Grouping passes and the collect-into-list default.
pub mod reconcile;

/// Per-run artifact evaluation.
pub mod stage;

/// Runtime values.
pub mod value;

pub use artifact::{ArtifactLoader, CsvLoader, FileLoader, JsonLinesLoader};
pub use ast::{ArtifactFn, FieldDescriptor, FieldKind, FieldSpec, Operator, QueryRequest, Reducer};
pub use builder::QueryBuilder;
pub use dataset::{Column, Dataset, DatasetError};
pub use errors::{QueryError, Result};
pub use executor::{Executor, QueryResult, QueryStats};
pub use frame::Frame;
pub use functions::FunctionRegistry;
pub use planner::{CompiledQuery, Planner, PlannerConfig, QueryExplain};
pub use stage::DroppedRun;
pub use value::Value;
