//! In-memory tabular dataset loaded from a run's artifact.
//!
//! Caller functions receive a `&Dataset` and compute a [`Value`] from it. The
//! dataset is column-major because the typical consumer reads one metric
//! trajectory (`loss`, `test_accuracy`, ...) top to bottom.

use thiserror::Error;

use crate::query::Value;

/// Errors raised while building or reading a [`Dataset`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    /// The requested column does not exist.
    #[error("column '{0}' not found")]
    MissingColumn(String),
    /// Columns of a dataset must all have the same length.
    #[error("column '{column}' has {found} values, expected {expected}")]
    LengthMismatch {
        /// Offending column.
        column: String,
        /// Length of the first column.
        expected: usize,
        /// Length of the offending column.
        found: usize,
    },
    /// A numeric view was requested over non-numeric data.
    #[error("column '{column}' contains non-numeric value {value}")]
    NonNumeric {
        /// Offending column.
        column: String,
        /// Rendered offending value.
        value: String,
    },
    /// Free-form error raised by a caller function.
    #[error("{0}")]
    Message(String),
}

impl From<&str> for DatasetError {
    fn from(value: &str) -> Self {
        DatasetError::Message(value.to_string())
    }
}

impl From<String> for DatasetError {
    fn from(value: String) -> Self {
        DatasetError::Message(value)
    }
}

/// Named column of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Column name as it appears in the artifact.
    pub name: String,
    /// One value per dataset row.
    pub values: Vec<Value>,
}

impl Column {
    /// Creates a column from anything convertible into values.
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Column-major table of values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: usize,
}

impl Dataset {
    /// Builds a dataset, checking that all columns have the same length.
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
            return Err(DatasetError::LengthMismatch {
                column: bad.name.clone(),
                expected: rows,
                found: bad.values.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Returns a dataset with the same columns and no rows.
    ///
    /// This is what deferred selections see once a deferred filter rejected
    /// the run.
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: Vec::new(),
                })
                .collect(),
            rows: 0,
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// `true` when the dataset holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column names in artifact order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// `true` if a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Values of the named column.
    pub fn column(&self, name: &str) -> Result<&[Value], DatasetError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    /// Numeric view of the named column. Nulls are skipped.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, DatasetError> {
        let mut out = Vec::with_capacity(self.rows);
        for value in self.column(name)? {
            if value.is_null() {
                continue;
            }
            match value.as_f64() {
                Some(v) => out.push(v),
                None => {
                    return Err(DatasetError::NonNumeric {
                        column: name.to_string(),
                        value: value.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Row `idx` as `(column, value)` pairs.
    pub fn row(&self, idx: usize) -> Option<Vec<(&str, &Value)>> {
        if idx >= self.rows {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.as_str(), &c.values[idx]))
                .collect(),
        )
    }
}
