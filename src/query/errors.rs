#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Clause a descriptor was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    /// `SELECT` list.
    Select,
    /// `WHERE` predicates.
    Filter,
    /// `GROUP BY` keys.
    GroupBy,
    /// Reducer attached to an output column.
    Aggregate,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Select => write!(f, "select"),
            Clause::Filter => write!(f, "filter"),
            Clause::GroupBy => write!(f, "group_by"),
            Clause::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// Errors surfaced by query normalization, compilation and execution.
///
/// Validation and compilation errors are raised before any I/O. Store errors
/// abort the call. Artifact errors are isolated per run and only ever reach
/// the caller through logs and [`QueryStats`](crate::query::executor::QueryStats).
#[derive(Debug, Error)]
pub enum QueryError {
    /// A field descriptor is malformed or a caller function broke its contract.
    #[error("invalid field '{field}': {reason}")]
    Validation {
        /// Field name as supplied by the caller (may be empty).
        field: String,
        /// Human readable reason.
        reason: String,
    },
    /// A descriptor cannot be translated at the given clause position.
    #[error("cannot compile field '{field}' in {clause}: {reason}")]
    Compilation {
        /// Field name being compiled.
        field: String,
        /// Clause the field appeared in.
        clause: Clause,
        /// Human readable reason.
        reason: String,
    },
    /// The relational store failed; fatal for the call.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A run's artifact could not be loaded or evaluated.
    #[error("artifact for run '{run_id}' at {path} failed: {reason}")]
    ArtifactLoad {
        /// Identifier of the run that owns the artifact.
        run_id: String,
        /// Resolved artifact path.
        path: PathBuf,
        /// Human readable reason.
        reason: String,
    },
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias used across the query engine.
pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    /// Builds a [`QueryError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`QueryError::Compilation`].
    pub fn compilation(field: impl Into<String>, clause: Clause, reason: impl Into<String>) -> Self {
        QueryError::Compilation {
            field: field.into(),
            clause,
            reason: reason.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Validation { .. } => "ValidationError",
            QueryError::Compilation { .. } => "CompilationError",
            QueryError::Store(_) => "StoreError",
            QueryError::ArtifactLoad { .. } => "ArtifactLoadError",
            QueryError::Config(_) => "ConfigError",
        }
    }
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
