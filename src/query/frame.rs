//! Result frame returned to callers.

use serde::Serialize;

use crate::query::planner::{ColumnRole, CompiledQuery};
use crate::query::reconcile::Row;
use crate::query::Value;

/// Ordered, named columns with one value per output row.
///
/// Grouped frames hold lists in every non-key column. The artifact reference
/// column is always retained as the last column.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Row>,
    grouped: bool,
}

impl Frame {
    /// Builds a frame from explicit parts. Every row must match `columns`.
    pub fn new(columns: Vec<String>, rows: Vec<Row>, grouped: bool) -> Self {
        Self {
            columns,
            rows,
            grouped,
        }
    }

    /// Builds the caller-facing frame, dropping hidden bookkeeping columns.
    pub(crate) fn from_compiled(compiled: &CompiledQuery, rows: Vec<Row>, grouped: bool) -> Self {
        let keep: Vec<bool> = compiled
            .columns
            .iter()
            .map(|c| c.role != ColumnRole::RunId)
            .collect();
        let columns = compiled
            .columns
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| **keep)
            .map(|(c, _)| c.name.clone())
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&keep)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v)
                    .collect()
            })
            .collect();
        Self::new(columns, rows, grouped)
    }

    /// Column names in output order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// `true` when the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `true` if values were grouped.
    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    /// Rows in output order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Index of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of a named column.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }

    /// Single cell lookup.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)
    }

    /// Row-oriented JSON: one object per row, keys in column order.
    pub fn to_records(&self) -> serde_json::Value {
        let records = self
            .rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (name, value) in self.columns.iter().zip(row) {
                    object.insert(name.clone(), value.to_json());
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(records)
    }
}
