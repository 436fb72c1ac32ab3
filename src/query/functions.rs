//! Named artifact functions and reducers.
//!
//! JSON requests cannot carry closures, so deferred fields reference
//! functions by name (`"fn": "trajectory:loss"`). Names take the form
//! `op` or `op:column`. Programmatic callers can register their own closures
//! under arbitrary names.

use std::collections::HashMap;

use crate::query::ast::{ArtifactFn, Reducer};
use crate::query::dataset::{Dataset, DatasetError};
use crate::query::Value;

/// Lookup table for named artifact functions.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    custom: HashMap<String, ArtifactFn>,
}

impl FunctionRegistry {
    /// Registry with only the built-in functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a caller function.
    pub fn register(&mut self, name: impl Into<String>, func: ArtifactFn) -> &mut Self {
        self.custom.insert(name.into(), func);
        self
    }

    /// Builder-style variant of [`FunctionRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, func: ArtifactFn) -> Self {
        self.register(name, func);
        self
    }

    /// Resolves a function name. Registered functions shadow built-ins.
    pub fn resolve(&self, name: &str) -> Option<ArtifactFn> {
        if let Some(func) = self.custom.get(name) {
            return Some(func.clone());
        }
        builtin(name)
    }
}

fn builtin(name: &str) -> Option<ArtifactFn> {
    let (op, arg) = match name.split_once(':') {
        Some((op, arg)) => (op.trim(), Some(arg.trim().to_string())),
        None => (name.trim(), None),
    };
    let label = name.to_string();
    match (op, arg) {
        ("len", None) => Some(ArtifactFn::named(label, |ds: &Dataset| {
            Ok(Value::Int(ds.num_rows() as i64))
        })),
        ("nonempty", None) => Some(ArtifactFn::named(label, |ds: &Dataset| {
            Ok(Value::Bool(!ds.is_empty()))
        })),
        ("has_column", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            Ok(Value::Bool(ds.has_column(&col)))
        })),
        ("trajectory", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            Ok(Value::List(ds.column(&col)?.to_vec()))
        })),
        ("first", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            Ok(ds
                .column(&col)?
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null))
        })),
        ("last", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            Ok(ds
                .column(&col)?
                .iter()
                .rev()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null))
        })),
        ("min", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            numeric(ds, &col, |xs| xs.iter().copied().reduce(f64::min))
        })),
        ("max", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            numeric(ds, &col, |xs| xs.iter().copied().reduce(f64::max))
        })),
        ("mean", Some(col)) => Some(ArtifactFn::named(label, move |ds: &Dataset| {
            numeric(ds, &col, mean)
        })),
        _ => None,
    }
}

fn numeric(
    ds: &Dataset,
    col: &str,
    fold: impl Fn(&[f64]) -> Option<f64>,
) -> Result<Value, DatasetError> {
    let xs = ds.column_f64(col)?;
    Ok(fold(&xs).map(Value::Float).unwrap_or(Value::Null))
}

fn mean(xs: &[f64]) -> Option<f64> {
    (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Resolves a built-in reducer by name.
///
/// Reducers see the collected member list of a grouped column; `identity`
/// keeps the list as is.
pub fn builtin_reducer(name: &str) -> Option<Reducer> {
    let label = name.to_string();
    match name.trim() {
        "identity" | "list" => Some(Reducer::named(label, Value::List)),
        "count" => Some(Reducer::named(label, |vs: Vec<Value>| {
            Value::Int(vs.len() as i64)
        })),
        "first" => Some(Reducer::named(label, |vs: Vec<Value>| {
            vs.into_iter().next().unwrap_or(Value::Null)
        })),
        "last" => Some(Reducer::named(label, |vs: Vec<Value>| {
            vs.into_iter().last().unwrap_or(Value::Null)
        })),
        "min" => Some(Reducer::named(label, |vs: Vec<Value>| {
            fold_numbers(&vs, |xs| xs.iter().copied().reduce(f64::min))
        })),
        "max" => Some(Reducer::named(label, |vs: Vec<Value>| {
            fold_numbers(&vs, |xs| xs.iter().copied().reduce(f64::max))
        })),
        "sum" => Some(Reducer::named(label, |vs: Vec<Value>| {
            fold_numbers(&vs, |xs| Some(xs.iter().sum()))
        })),
        "mean" => Some(Reducer::named(label, |vs: Vec<Value>| fold_numbers(&vs, mean))),
        _ => None,
    }
}

fn fold_numbers(values: &[Value], fold: impl Fn(&[f64]) -> Option<f64>) -> Value {
    let xs: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    fold(&xs).map(Value::Float).unwrap_or(Value::Null)
}
