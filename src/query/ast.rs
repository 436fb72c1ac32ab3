//! Caller-facing request shapes and the canonical field descriptors they are
//! normalized into.
//!
//! A [`QueryRequest`] is what callers build (directly, through
//! [`QueryBuilder`](crate::query::QueryBuilder), or by deserializing JSON).
//! Its loosely shaped [`FieldSpec`]s are lowered into [`FieldDescriptor`]s by
//! the normalizer before the planner sees them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::query::dataset::{Dataset, DatasetError};
use crate::query::Value;

/// Signature of a caller function evaluated against a run's artifact.
pub type ArtifactFnPtr = dyn Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync;

/// Signature of a reducer applied to a collected group column.
pub type ReducerFnPtr = dyn Fn(Vec<Value>) -> Value + Send + Sync;

/// Opaque caller capability `Dataset -> Value` (or `Dataset -> Bool` for filters).
#[derive(Clone)]
pub struct ArtifactFn {
    name: Option<String>,
    func: Arc<ArtifactFnPtr>,
}

impl ArtifactFn {
    /// Wraps an anonymous closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    /// Wraps a closure and remembers a display name for explain output.
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Dataset) -> std::result::Result<Value, DatasetError> + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            func: Arc::new(func),
        }
    }

    /// Display name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Evaluates the function against a dataset.
    pub fn call(&self, dataset: &Dataset) -> std::result::Result<Value, DatasetError> {
        (self.func)(dataset)
    }
}

impl fmt::Debug for ArtifactFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "ArtifactFn({name})"),
            None => write!(f, "ArtifactFn(<closure>)"),
        }
    }
}

/// Reducer applied to a collected column after grouping.
#[derive(Clone)]
pub struct Reducer {
    name: Option<String>,
    func: Arc<ReducerFnPtr>,
}

impl Reducer {
    /// Wraps an anonymous reducer closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    /// Wraps a reducer closure with a display name.
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            func: Arc::new(func),
        }
    }

    /// Display name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Applies the reducer.
    pub fn apply(&self, values: Vec<Value>) -> Value {
        (self.func)(values)
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Reducer({name})"),
            None => write!(f, "Reducer(<closure>)"),
        }
    }
}

/// Where a field's value comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FieldKind {
    /// Plain relational column.
    Row,
    /// Key nested inside a semi-structured blob column.
    JsonPath,
    /// Computed by a caller function over the run's artifact.
    External,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Row => write!(f, "row"),
            FieldKind::JsonPath => write!(f, "json"),
            FieldKind::External => write!(f, "function"),
        }
    }
}

/// Comparison operator for filter descriptors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Operator {
    /// `=`
    #[default]
    Eq,
    /// `!=` / `<>`, compiled null-safe.
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `LIKE`
    Like,
}

impl Operator {
    /// Parses a caller-supplied operator token.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::NotEq),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::LtEq),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::GtEq),
            "LIKE" => Some(Operator::Like),
            _ => None,
        }
    }

    /// SQL spelling of the operator.
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "IS NOT",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
        };
        f.write_str(token)
    }
}

/// Source of a canonical field. Exactly one source is active per descriptor.
#[derive(Clone, Debug)]
pub enum FieldSource {
    /// Relational column, referenced verbatim.
    Row {
        /// Column name.
        column: String,
    },
    /// Nested key inside a blob column.
    JsonPath {
        /// Blob column (first path segment).
        blob: String,
        /// Nested key (remainder of the path).
        key: String,
    },
    /// Deferred computation over the run's artifact.
    External {
        /// Caller function.
        func: ArtifactFn,
    },
}

/// Canonical, fully specified field descriptor.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    /// Field name as supplied by the caller.
    pub field: String,
    /// Where the value comes from.
    pub source: FieldSource,
    /// Comparison operator; only meaningful for filters.
    pub operator: Operator,
    /// Comparison literal; only meaningful for filters.
    pub value: Option<Value>,
}

impl FieldDescriptor {
    /// Kind tag derived from the source.
    pub fn kind(&self) -> FieldKind {
        match self.source {
            FieldSource::Row { .. } => FieldKind::Row,
            FieldSource::JsonPath { .. } => FieldKind::JsonPath,
            FieldSource::External { .. } => FieldKind::External,
        }
    }

    /// `true` if the field can only be resolved after loading the artifact.
    pub fn is_deferred(&self) -> bool {
        self.kind() == FieldKind::External
    }
}

/// Reference to a caller function inside a raw spec.
#[derive(Clone, Debug)]
pub enum FnSpec {
    /// Name resolved through the function registry (JSON requests).
    Named(String),
    /// Closure supplied programmatically.
    Callable(ArtifactFn),
}

impl<'de> Deserialize<'de> for FnSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        if name.trim().is_empty() {
            return Err(de::Error::custom("function name cannot be empty"));
        }
        Ok(FnSpec::Named(name))
    }
}

impl From<ArtifactFn> for FnSpec {
    fn from(value: ArtifactFn) -> Self {
        FnSpec::Callable(value)
    }
}

/// Partially specified descriptor object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDescriptor {
    /// Field name.
    #[serde(default)]
    pub field: Option<String>,
    /// Optional kind hint: `row`, `json` or `function`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Filter operator; defaults to `=`.
    #[serde(default)]
    pub operator: Option<String>,
    /// Filter literal.
    #[serde(default)]
    pub value: Option<Value>,
    /// Caller function.
    #[serde(default, rename = "fn")]
    pub func: Option<FnSpec>,
}

/// One caller-supplied field: a bare name or a descriptor object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    /// Bare field name, e.g. `"id"` or `"config.lr"`.
    Name(String),
    /// Structured descriptor.
    Descriptor(RawDescriptor),
}

impl FieldSpec {
    /// Field name, if present.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            FieldSpec::Name(name) => Some(name),
            FieldSpec::Descriptor(raw) => raw.field.as_deref(),
        }
    }

    /// Descriptor computed by `func` over the artifact.
    pub fn function(field: impl Into<String>, func: ArtifactFn) -> Self {
        FieldSpec::Descriptor(RawDescriptor {
            field: Some(field.into()),
            kind: Some("function".into()),
            func: Some(FnSpec::Callable(func)),
            ..RawDescriptor::default()
        })
    }

    /// Filter descriptor comparing `field` against `value`.
    pub fn compare(field: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        FieldSpec::Descriptor(RawDescriptor {
            field: Some(field.into()),
            operator: Some(operator.to_string()),
            value: Some(value.into()),
            ..RawDescriptor::default()
        })
    }
}

impl From<&str> for FieldSpec {
    fn from(value: &str) -> Self {
        FieldSpec::Name(value.to_owned())
    }
}

impl From<String> for FieldSpec {
    fn from(value: String) -> Self {
        FieldSpec::Name(value)
    }
}

impl From<RawDescriptor> for FieldSpec {
    fn from(value: RawDescriptor) -> Self {
        FieldSpec::Descriptor(value)
    }
}

/// Reference to a reducer inside a request.
#[derive(Clone, Debug)]
pub enum ReducerSpec {
    /// Built-in reducer by name.
    Named(String),
    /// Closure supplied programmatically.
    Callable(Reducer),
}

impl<'de> Deserialize<'de> for ReducerSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(ReducerSpec::Named)
    }
}

/// Select, filter and group-by specs for one call.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    /// Output fields, in order.
    #[serde(default)]
    pub select: Vec<FieldSpec>,
    /// Predicates, applied in declaration order.
    #[serde(default, alias = "where")]
    pub filter: Vec<FieldSpec>,
    /// Grouping keys.
    #[serde(default)]
    pub group_by: Vec<FieldSpec>,
    /// Optional reducers keyed by output column name.
    #[serde(default)]
    pub aggregate: BTreeMap<String, ReducerSpec>,
}

impl QueryRequest {
    /// Parses a JSON request document.
    pub fn from_json(input: &str) -> crate::query::errors::Result<Self> {
        serde_json::from_str(input).map_err(|err| {
            crate::query::errors::QueryError::validation("<request>", err.to_string())
        })
    }
}
