use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use tracing::debug;

use super::{RunStore, StoreError, StoreRows};
use crate::query::Value;

/// Connection options for [`SqliteRunStore`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Open connections read-only.
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            read_only: true,
        }
    }
}

/// Run store backed by a SQLite file with a `runs` table.
///
/// Every call opens its own connection and drops it before returning, on
/// success and error paths alike.
#[derive(Clone, Debug)]
pub struct SqliteRunStore {
    path: PathBuf,
    options: StoreOptions,
}

impl SqliteRunStore {
    /// Points the store at an existing database file.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::MissingDatabase(path));
        }
        Ok(Self { path, options })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        flags |= if self.options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(Duration::from_millis(self.options.busy_timeout_ms))?;
        Ok(conn)
    }
}

impl RunStore for SqliteRunStore {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<StoreRows, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(decode(row.get_ref(idx)?));
            }
            rows.push(values);
        }
        debug!(
            path = %self.path.display(),
            rows = rows.len(),
            columns = width,
            "store.sqlite.execute"
        );
        Ok(StoreRows { columns, rows })
    }
}

fn decode(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::List(_) | Value::Object(_) => {
                ToSqlOutput::Owned(SqlValue::Text(self.to_json().to_string()))
            }
        })
    }
}
