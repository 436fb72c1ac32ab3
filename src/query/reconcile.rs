//! Result reconciliation.
//!
//! Two grouping passes share one collector:
//!
//! * [`collapse_groups`] rebuilds relational groups after their members were
//!   staged one by one (some members may have been dropped on the way).
//! * [`regroup`] groups flattened rows a second time once deferred group key
//!   values are known.
//!
//! Neither pass reduces anything. Every non-key column becomes the ordered
//! list of member values; reducers, if any, run afterwards.

use std::collections::HashMap;

use tracing::debug;

use crate::query::ast::Reducer;
use crate::query::errors::Result;
use crate::query::planner::CompiledQuery;
use crate::query::Value;
use crate::store::{StoreError, StoreRows};

/// One output row, aligned with the compiled output columns.
pub type Row = Vec<Value>;

/// The collect-into-list default: gathers member values in arrival order.
pub fn collect<I>(values: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    Value::List(values.into_iter().collect())
}

/// Converts store rows into engine rows, decoding list-aggregated columns.
///
/// `json_group_array` results arrive as JSON text and become [`Value::List`].
pub fn decode_relational(compiled: &CompiledQuery, raw: StoreRows) -> Result<Vec<Row>> {
    if raw.columns.len() != compiled.columns.len() {
        return Err(StoreError::Message(format!(
            "store returned {} columns, plan expects {}",
            raw.columns.len(),
            compiled.columns.len()
        ))
        .into());
    }
    let aggregated = compiled.aggregated_flags();
    let mut rows = Vec::with_capacity(raw.rows.len());
    for row in raw.rows {
        let mut decoded = Vec::with_capacity(row.len());
        for (value, is_list) in row.into_iter().zip(aggregated.iter().copied()) {
            decoded.push(if is_list { decode_collected(value)? } else { value });
        }
        rows.push(decoded);
    }
    Ok(rows)
}

fn decode_collected(value: Value) -> Result<Value> {
    match value {
        Value::String(text) => {
            let json: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
                StoreError::Message(format!("malformed aggregated column: {err}"))
            })?;
            match Value::from_json(json) {
                list @ Value::List(_) => Ok(list),
                other => Ok(Value::List(vec![other])),
            }
        }
        Value::Null => Ok(Value::List(Vec::new())),
        list @ Value::List(_) => Ok(list),
        other => Ok(Value::List(vec![other])),
    }
}

/// Splits a grouped row into one row per member.
///
/// Aggregated cells are indexed per member; scalar cells (group keys) are
/// repeated. A row without aggregated columns is its own single member.
pub fn explode(row: &Row, aggregated: &[bool]) -> Vec<Row> {
    let members = row
        .iter()
        .zip(aggregated)
        .filter(|(_, is_list)| **is_list)
        .filter_map(|(value, _)| value.as_list().map(<[Value]>::len))
        .max()
        .unwrap_or(1);
    (0..members)
        .map(|idx| {
            row.iter()
                .zip(aggregated)
                .map(|(value, is_list)| match (is_list, value) {
                    (true, Value::List(items)) => items.get(idx).cloned().unwrap_or(Value::Null),
                    _ => value.clone(),
                })
                .collect()
        })
        .collect()
}

/// Collapses staged members of one group back into a single row.
///
/// Returns `None` when no member survived.
pub fn collapse(members: Vec<Row>, aggregated: &[bool]) -> Option<Row> {
    let first = members.first()?.clone();
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(members.len()); aggregated.len()];
    for member in members {
        for (idx, value) in member.into_iter().enumerate() {
            if let Some(column) = columns.get_mut(idx) {
                column.push(value);
            }
        }
    }
    Some(
        columns
            .into_iter()
            .zip(aggregated)
            .enumerate()
            .map(|(idx, (values, is_list))| {
                if *is_list {
                    collect(values)
                } else {
                    first.get(idx).cloned().unwrap_or(Value::Null)
                }
            })
            .collect(),
    )
}

/// First pass: rebuilds relational groups from `(group index, member)` pairs.
///
/// Members must arrive ordered by group index, which is how the executor
/// explodes them. Groups with no surviving member disappear.
pub fn collapse_groups(members: Vec<(usize, Row)>, aggregated: &[bool]) -> Vec<Row> {
    let mut out = Vec::new();
    let mut current: Option<usize> = None;
    let mut pending: Vec<Row> = Vec::new();
    for (group, member) in members {
        if current != Some(group) {
            out.extend(collapse(std::mem::take(&mut pending), aggregated));
            current = Some(group);
        }
        pending.push(member);
    }
    out.extend(collapse(pending, aggregated));
    out
}

/// Second pass: groups flat rows by the values at `key_slots`.
///
/// Groups appear in order of first arrival and members keep arrival order.
/// Key columns stay scalar; every other column is collected.
pub fn regroup(rows: Vec<Row>, key_slots: &[usize]) -> Vec<Row> {
    let width = rows.first().map_or(0, Vec::len);
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Row, Vec<Vec<Value>>)> = Vec::new();
    let input = rows.len();
    for row in rows {
        let key: Vec<Value> = key_slots
            .iter()
            .map(|slot| row.get(*slot).cloned().unwrap_or(Value::Null))
            .collect();
        let group_key = Value::List(key).group_key();
        let pos = match index.get(&group_key) {
            Some(pos) => *pos,
            None => {
                groups.push((row.clone(), vec![Vec::new(); width]));
                index.insert(group_key, groups.len() - 1);
                groups.len() - 1
            }
        };
        let (_, columns) = &mut groups[pos];
        for (idx, value) in row.into_iter().enumerate() {
            if let Some(column) = columns.get_mut(idx) {
                column.push(value);
            }
        }
    }
    debug!(rows = input, groups = groups.len(), "reconcile.regroup");
    groups
        .into_iter()
        .map(|(first, columns)| {
            columns
                .into_iter()
                .enumerate()
                .map(|(idx, values)| {
                    if key_slots.contains(&idx) {
                        first.get(idx).cloned().unwrap_or(Value::Null)
                    } else {
                        collect(values)
                    }
                })
                .collect()
        })
        .collect()
}

/// Applies reducers to collected cells. Cells that are not lists are left alone.
pub fn apply_reducers(rows: &mut [Row], reducers: &[(usize, Reducer)], collected: &[bool]) {
    if reducers.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        for (slot, reducer) in reducers {
            if !collected.get(*slot).copied().unwrap_or(false) {
                continue;
            }
            if let Some(cell) = row.get_mut(*slot) {
                if let Value::List(items) = cell {
                    let items = std::mem::take(items);
                    *cell = reducer.apply(items);
                }
            }
        }
    }
}
