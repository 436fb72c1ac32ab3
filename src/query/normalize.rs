//! Field descriptor normalization.
//!
//! Turns loosely shaped [`FieldSpec`]s into canonical [`FieldDescriptor`]s.
//! Purely structural: no I/O and no knowledge of the store schema.
//!
//! Classification rules:
//! * anything carrying a function is [`FieldKind::External`](crate::query::ast::FieldKind::External),
//!   whatever its name or `type` hint says;
//! * otherwise a name containing [`PATH_SEPARATOR`] is a JSON path, split at
//!   the first separator into blob column and nested key;
//! * otherwise it is a plain row column.

use crate::query::ast::{FieldDescriptor, FieldSource, FieldSpec, FnSpec, Operator, RawDescriptor};
use crate::query::errors::{Clause, QueryError, Result};
use crate::query::functions::FunctionRegistry;

/// Separator between the blob column and the nested key.
pub const PATH_SEPARATOR: char = '.';

/// Normalizes every spec of one clause, preserving order.
pub fn normalize(
    specs: &[FieldSpec],
    clause: Clause,
    registry: &FunctionRegistry,
) -> Result<Vec<FieldDescriptor>> {
    specs
        .iter()
        .map(|spec| normalize_one(spec, clause, registry))
        .collect()
}

/// Normalizes a single spec.
pub fn normalize_one(
    spec: &FieldSpec,
    clause: Clause,
    registry: &FunctionRegistry,
) -> Result<FieldDescriptor> {
    match spec {
        FieldSpec::Name(name) => {
            let field = require_name(Some(name))?;
            Ok(FieldDescriptor {
                source: classify_path(&field)?,
                field,
                operator: Operator::Eq,
                value: None,
            })
        }
        FieldSpec::Descriptor(raw) => normalize_raw(raw, clause, registry),
    }
}

fn normalize_raw(
    raw: &RawDescriptor,
    clause: Clause,
    registry: &FunctionRegistry,
) -> Result<FieldDescriptor> {
    let field = require_name(raw.field.as_deref())?;
    let hint = raw.kind.as_deref().map(str::trim).map(str::to_ascii_lowercase);
    match hint.as_deref() {
        None | Some("row") | Some("json") | Some("function") => {}
        Some(other) => {
            return Err(QueryError::compilation(
                field,
                clause,
                format!("unknown field type '{other}' (expected row, json or function)"),
            ))
        }
    }

    let source = match &raw.func {
        Some(FnSpec::Callable(func)) => FieldSource::External { func: func.clone() },
        Some(FnSpec::Named(name)) => match registry.resolve(name) {
            Some(func) => FieldSource::External { func },
            None => {
                return Err(QueryError::compilation(
                    field,
                    clause,
                    format!("unknown function '{name}'"),
                ))
            }
        },
        None if hint.as_deref() == Some("function") => {
            return Err(QueryError::compilation(
                field,
                clause,
                "type 'function' requires an fn",
            ))
        }
        None => classify_path(&field)?,
    };

    let operator = match raw.operator.as_deref() {
        None => Operator::Eq,
        Some(token) => Operator::parse(token).ok_or_else(|| {
            QueryError::compilation(field.clone(), clause, format!("unknown operator '{token}'"))
        })?,
    };

    let deferred = matches!(source, FieldSource::External { .. });
    if clause == Clause::Filter && !deferred && raw.value.is_none() {
        return Err(QueryError::compilation(
            field,
            clause,
            "filter requires a value",
        ));
    }

    Ok(FieldDescriptor {
        field,
        source,
        operator,
        value: raw.value.clone(),
    })
}

fn require_name(name: Option<&str>) -> Result<String> {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(QueryError::validation("", "field name is required")),
    }
}

fn classify_path(field: &str) -> Result<FieldSource> {
    match field.split_once(PATH_SEPARATOR) {
        None => Ok(FieldSource::Row {
            column: field.to_string(),
        }),
        Some((blob, key)) if !blob.is_empty() && !key.is_empty() => Ok(FieldSource::JsonPath {
            blob: blob.to_string(),
            key: key.to_string(),
        }),
        Some(_) => Err(QueryError::validation(
            field,
            "json path needs both a blob column and a key",
        )),
    }
}
