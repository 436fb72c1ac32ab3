//! Artifact loading: map a file path to an in-memory [`Dataset`].
//!
//! CSV and JSON-lines histories are always supported. Parquet histories use
//! the default `parquet` cargo feature; builds without it report
//! [`ArtifactError::UnsupportedFormat`] for `.parquet` files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;

use crate::query::dataset::{Column, Dataset, DatasetError};
use crate::query::Value;

/// Errors raised while loading an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// CSV decoding failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// A JSON-lines record was malformed.
    #[error("line {line}: {source}")]
    Json {
        /// 1-based line number.
        line: usize,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// The decoded table was inconsistent.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// No loader handles this file type.
    #[error("unsupported artifact format '{0}'")]
    UnsupportedFormat(String),
    /// Parquet decoding failed.
    #[cfg(feature = "parquet")]
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Maps an artifact path to a dataset.
///
/// Loads for different runs share no mutable state, so implementations are
/// called concurrently when parallel loading is enabled.
pub trait ArtifactLoader: Send + Sync {
    /// Loads the artifact at `path`.
    fn load(&self, path: &Path) -> Result<Dataset, ArtifactError>;
}

/// Loader for delimited text histories with a header row.
#[derive(Clone, Debug)]
pub struct CsvLoader {
    delimiter: u8,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvLoader {
    /// Loader for a custom delimiter (`b'\t'` for TSV).
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl ArtifactLoader for CsvLoader {
    fn load(&self, path: &Path) -> Result<Dataset, ArtifactError> {
        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(file);
        let headers = reader.headers()?.clone();
        let mut columns: Vec<Column> = headers
            .iter()
            .map(|name| Column {
                name: name.to_string(),
                values: Vec::new(),
            })
            .collect();
        for record in reader.records() {
            let record = record?;
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                column.values.push(parse_cell(cell));
            }
        }
        Ok(Dataset::new(columns)?)
    }
}

/// Infers a typed value from a text cell.
pub(crate) fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Value::Float(v);
    }
    match trimmed {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Loader for newline-delimited JSON objects, one object per step.
#[derive(Clone, Debug, Default)]
pub struct JsonLinesLoader;

impl ArtifactLoader for JsonLinesLoader {
    fn load(&self, path: &Path) -> Result<Dataset, ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        let mut columns: Vec<Column> = Vec::new();
        let mut rows = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let record: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
                .map_err(|source| ArtifactError::Json {
                    line: idx + 1,
                    source,
                })?;
            for (key, value) in record {
                let pos = match columns.iter().position(|c| c.name == key) {
                    Some(pos) => pos,
                    None => {
                        // Keys first seen late are null for earlier steps.
                        columns.push(Column {
                            name: key,
                            values: vec![Value::Null; rows],
                        });
                        columns.len() - 1
                    }
                };
                columns[pos].values.push(Value::from_json(value));
            }
            rows += 1;
            for column in columns.iter_mut() {
                if column.values.len() < rows {
                    column.values.push(Value::Null);
                }
            }
        }
        Ok(Dataset::new(columns)?)
    }
}

/// Parquet history loader.
#[cfg(feature = "parquet")]
#[derive(Clone, Debug, Default)]
pub struct ParquetLoader;

#[cfg(feature = "parquet")]
impl ArtifactLoader for ParquetLoader {
    fn load(&self, path: &Path) -> Result<Dataset, ArtifactError> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = SerializedFileReader::new(file)?;
        let names: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect();
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column {
                name,
                values: Vec::new(),
            })
            .collect();
        for row in reader.get_row_iter(None)? {
            let row = row?;
            for (column, (_, field)) in columns.iter_mut().zip(row.get_column_iter()) {
                column.values.push(parquet_value(field));
            }
        }
        Ok(Dataset::new(columns)?)
    }
}

#[cfg(feature = "parquet")]
fn parquet_value(field: &parquet::record::Field) -> Value {
    use parquet::record::Field;

    match field {
        Field::Null => Value::Null,
        Field::Bool(v) => Value::Bool(*v),
        Field::Byte(v) => Value::Int(i64::from(*v)),
        Field::Short(v) => Value::Int(i64::from(*v)),
        Field::Int(v) => Value::Int(i64::from(*v)),
        Field::Long(v) => Value::Int(*v),
        Field::UByte(v) => Value::Int(i64::from(*v)),
        Field::UShort(v) => Value::Int(i64::from(*v)),
        Field::UInt(v) => Value::Int(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v)
            .map(Value::Int)
            .unwrap_or(Value::Float(*v as f64)),
        Field::Float(v) => Value::Float(f64::from(*v)),
        Field::Double(v) => Value::Float(*v),
        Field::Str(v) => Value::String(v.clone()),
        Field::ListInternal(list) => Value::List(list.elements().iter().map(parquet_value).collect()),
        other => Value::String(other.to_string()),
    }
}

/// Artifact format chosen from the file extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactFormat {
    /// `.csv`
    Csv,
    /// `.tsv`
    Tsv,
    /// `.jsonl` / `.ndjson`
    JsonLines,
    /// `.parquet`
    Parquet,
}

impl ArtifactFormat {
    /// Detects the format of `path` by extension.
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ArtifactFormat::Csv),
            "tsv" => Some(ArtifactFormat::Tsv),
            "jsonl" | "ndjson" => Some(ArtifactFormat::JsonLines),
            "parquet" => Some(ArtifactFormat::Parquet),
            _ => None,
        }
    }
}

/// Loader that dispatches on the file extension.
#[derive(Clone, Debug, Default)]
pub struct FileLoader;

impl ArtifactLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<Dataset, ArtifactError> {
        match ArtifactFormat::detect(path) {
            Some(ArtifactFormat::Csv) => CsvLoader::default().load(path),
            Some(ArtifactFormat::Tsv) => CsvLoader::with_delimiter(b'\t').load(path),
            Some(ArtifactFormat::JsonLines) => JsonLinesLoader.load(path),
            #[cfg(feature = "parquet")]
            Some(ArtifactFormat::Parquet) => ParquetLoader.load(path),
            #[cfg(not(feature = "parquet"))]
            Some(ArtifactFormat::Parquet) => Err(ArtifactError::UnsupportedFormat(
                "parquet (build with the `parquet` feature)".into(),
            )),
            None => Err(ArtifactError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("<none>")
                    .to_string(),
            )),
        }
    }
}
