#![forbid(unsafe_code)]

//! Relational store collaborator.
//!
//! The engine only needs "execute a parameterized query, return rows and
//! column names". Populating the store is someone else's job.

use std::path::PathBuf;

use thiserror::Error;

use crate::query::Value;

/// SQLite-backed run store.
pub mod sqlite;

pub use sqlite::{SqliteRunStore, StoreOptions};

/// Rows returned by a store call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreRows {
    /// Column names in statement order.
    pub columns: Vec<String>,
    /// One entry per row, aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

/// Errors raised by a store. Always fatal for the call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database file not found at the configured path.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// SQLite failure (connection or statement).
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Other store failure.
    #[error("{0}")]
    Message(String),
}

/// Executes parameterized statements against the run table.
///
/// Implementations must be shareable across artifact worker threads even
/// though the store itself is only called once per query.
pub trait RunStore: Send + Sync {
    /// Executes `sql` with positional `params` and returns every row.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<StoreRows, StoreError>;
}
