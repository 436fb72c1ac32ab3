//! Query compiler and aggregation planner.
//!
//! Lowers normalized descriptors into a single parameterized statement of
//! the shape
//!
//! ```text
//! SELECT <select-list> FROM runs WHERE <predicates>
//!     [GROUP BY <keys> ORDER BY MIN(rowid)]
//! ```
//!
//! plus the bookkeeping the artifact stage and reconciler need. Every
//! descriptor kind has a fixed rule per clause:
//!
//! | kind     | select                  | filter          | group by          |
//! |----------|-------------------------|-----------------|-------------------|
//! | row      | column                  | `col op ?`      | column            |
//! | json     | `CAST(b ->> 'k' AS TEXT)` | `expr op CAST(? AS TEXT)` | same expression |
//! | function | `id` placeholder slot   | deferred        | `id` + deferred   |
//!
//! When any grouping is requested every selected expression that is not a
//! group key is wrapped in `json_group_array(... ORDER BY rowid)`, so members
//! are collected in arrival order and never reduced. Groups themselves are
//! emitted in the order their first member arrived.
//!
//! The `->>` key is a single object label: `config.opt.beta` reads the key
//! `"opt.beta"` of `config`, not `beta` inside `opt`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hasher;

use serde::Serialize;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::query::ast::{
    ArtifactFn, FieldDescriptor, FieldKind, FieldSource, QueryRequest, Reducer, ReducerSpec,
};
use crate::query::errors::{Clause, QueryError, Result};
use crate::query::functions::{builtin_reducer, FunctionRegistry};
use crate::query::normalize::normalize;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::Value;

/// Alias of the hidden run identifier column carried for correlation.
pub const RUN_ID_ALIAS: &str = "__run_id";

/// Planner inputs describing the store layout.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Table holding one row per run.
    pub table: String,
    /// Unique run identifier column.
    pub id_column: String,
    /// Column holding the artifact reference.
    pub artifact_column: String,
    /// Column giving insertion order; groups and members follow it.
    pub arrival_column: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            table: "runs".into(),
            id_column: "id".into(),
            artifact_column: "file_path".into(),
            arrival_column: "rowid".into(),
        }
    }
}

/// Role of an output column of the compiled statement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Caller-selected relational field.
    Selected,
    /// Slot later filled by a deferred selection or deferred group key.
    Deferred,
    /// Relational group key appended so the second grouping pass can see it.
    GroupKey,
    /// Hidden run identifier.
    RunId,
    /// Artifact reference, always last.
    Artifact,
}

/// Output column of the compiled statement.
#[derive(Clone, Debug, Serialize)]
pub struct OutputColumn {
    /// Column alias in the result.
    pub name: String,
    /// Scalar SQL expression (before list aggregation).
    pub expr: String,
    /// Why the column exists.
    pub role: ColumnRole,
    /// `true` if wrapped in `json_group_array`.
    pub aggregated: bool,
}

/// Deferred field resolved by the artifact stage.
#[derive(Clone, Debug)]
pub struct DeferredField {
    /// Field name as supplied by the caller.
    pub field: String,
    /// Output column alias.
    pub alias: String,
    /// Caller function.
    pub func: ArtifactFn,
    /// Index of the output column the value is written to; `None` for filters.
    pub slot: Option<usize>,
}

/// Compiled statement plus post-processing bookkeeping.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    /// Statement text with `?` placeholders.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<Value>,
    /// Output columns in statement order.
    pub columns: Vec<OutputColumn>,
    /// `true` if a `GROUP BY` clause was emitted.
    pub grouped: bool,
    /// Output column indices of relational group keys, in declaration order.
    pub group_key_slots: Vec<usize>,
    /// Deferred selections, in declaration order.
    pub deferred_selects: Vec<DeferredField>,
    /// Deferred filters, in declaration order.
    pub deferred_filters: Vec<DeferredField>,
    /// Deferred group keys, in declaration order.
    pub deferred_groups: Vec<DeferredField>,
    /// Reducers keyed by output column index.
    pub reducers: Vec<(usize, Reducer)>,
    /// Deterministic hash of the statement and parameters.
    pub plan_hash: u64,
}

impl CompiledQuery {
    /// `true` if any artifact has to be loaded.
    pub fn needs_artifacts(&self) -> bool {
        !self.deferred_selects.is_empty()
            || !self.deferred_filters.is_empty()
            || !self.deferred_groups.is_empty()
    }

    /// Per-column list-aggregation flags.
    pub fn aggregated_flags(&self) -> Vec<bool> {
        self.columns.iter().map(|c| c.aggregated).collect()
    }

    /// Index of the first column with the given role.
    pub fn slot_of(&self, role: ColumnRole) -> Option<usize> {
        self.columns.iter().position(|c| c.role == role)
    }

    /// Output column indices forming the second-pass grouping key.
    pub fn regroup_key_slots(&self) -> Vec<usize> {
        let mut slots = self.group_key_slots.clone();
        for deferred in &self.deferred_groups {
            if let Some(slot) = deferred.slot {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
        slots
    }

    /// Human readable summary of the plan.
    pub fn explain(&self) -> QueryExplain {
        let describe = |fields: &[DeferredField]| {
            fields
                .iter()
                .map(|d| match d.func.name() {
                    Some(name) => format!("{} <- {name}", d.alias),
                    None => format!("{} <- <closure>", d.alias),
                })
                .collect::<Vec<_>>()
        };
        QueryExplain {
            sql: self.sql.clone(),
            params: self.params.clone(),
            columns: self.columns.clone(),
            grouped: self.grouped,
            deferred_selects: describe(self.deferred_selects.as_slice()),
            deferred_filters: describe(self.deferred_filters.as_slice()),
            deferred_groups: describe(self.deferred_groups.as_slice()),
            plan_hash: format!("{:016x}", self.plan_hash),
        }
    }
}

/// Explain output for a compiled query.
#[derive(Clone, Debug, Serialize)]
pub struct QueryExplain {
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
    /// Output columns.
    pub columns: Vec<OutputColumn>,
    /// Whether relational grouping is active.
    pub grouped: bool,
    /// Deferred selections as `alias <- function`.
    pub deferred_selects: Vec<String>,
    /// Deferred filters as `alias <- function`.
    pub deferred_filters: Vec<String>,
    /// Deferred group keys as `alias <- function`.
    pub deferred_groups: Vec<String>,
    /// Hex plan hash.
    pub plan_hash: String,
}

impl fmt::Display for QueryExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_json().to_string()).collect();
            writeln!(f, "params: [{}]", params.join(", "))?;
        }
        for (title, entries) in [
            ("deferred select", &self.deferred_selects),
            ("deferred filter", &self.deferred_filters),
            ("deferred group", &self.deferred_groups),
        ] {
            for entry in entries {
                writeln!(f, "{title}: {entry}")?;
            }
        }
        write!(f, "plan hash: {}", self.plan_hash)
    }
}

/// Rule-based compiler from requests to [`CompiledQuery`].
#[derive(Clone, Debug, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner for the given store layout.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Store layout this planner compiles against.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Normalizes and compiles a request.
    pub fn plan(&self, request: &QueryRequest, registry: &FunctionRegistry) -> Result<CompiledQuery> {
        let start = profile_timer();
        let select = if request.select.is_empty() {
            normalize(&[self.config.id_column.as_str().into()], Clause::Select, registry)?
        } else {
            normalize(&request.select, Clause::Select, registry)?
        };
        let filter = normalize(&request.filter, Clause::Filter, registry)?;
        let group_by = normalize(&request.group_by, Clause::GroupBy, registry)?;
        let compiled = self.compile(&select, &filter, &group_by, &request.aggregate);
        record_profile_timer(QueryProfileKind::Compile, start);
        compiled
    }

    /// Compiles already-normalized descriptors.
    pub fn compile(
        &self,
        select: &[FieldDescriptor],
        filter: &[FieldDescriptor],
        group_by: &[FieldDescriptor],
        aggregate: &BTreeMap<String, ReducerSpec>,
    ) -> Result<CompiledQuery> {
        self.check_identifier(&self.config.table, Clause::Select)?;
        self.check_identifier(&self.config.id_column, Clause::Select)?;
        self.check_identifier(&self.config.artifact_column, Clause::Select)?;
        self.check_identifier(&self.config.arrival_column, Clause::GroupBy)?;
        let id_expr = self.config.id_column.clone();

        // Group keys first: the aggregation policy depends on them.
        let mut group_exprs: Vec<String> = Vec::new();
        let mut relational_keys: Vec<(&FieldDescriptor, String)> = Vec::new();
        let mut deferred_group_descs: Vec<&FieldDescriptor> = Vec::new();
        for desc in group_by {
            let expr = match desc.kind() {
                FieldKind::External => {
                    deferred_group_descs.push(desc);
                    id_expr.clone()
                }
                _ => {
                    let expr = self.scalar_expr(desc, Clause::GroupBy)?;
                    relational_keys.push((desc, expr.clone()));
                    expr
                }
            };
            if !group_exprs.contains(&expr) {
                group_exprs.push(expr);
            }
        }
        let grouped = !group_exprs.is_empty();
        let aggregated = |expr: &str| grouped && !group_exprs.iter().any(|g| g == expr);

        let mut columns: Vec<OutputColumn> = Vec::new();
        let mut deferred_selects = Vec::new();
        for desc in select {
            match &desc.source {
                FieldSource::External { func } => {
                    let alias = sanitize_alias(&desc.field);
                    deferred_selects.push(DeferredField {
                        field: desc.field.clone(),
                        alias: alias.clone(),
                        func: func.clone(),
                        slot: Some(columns.len()),
                    });
                    columns.push(OutputColumn {
                        name: alias,
                        aggregated: aggregated(id_expr.as_str()),
                        expr: id_expr.clone(),
                        role: ColumnRole::Deferred,
                    });
                }
                FieldSource::Row { column } if *column == self.config.artifact_column => {
                    // Always emitted as the trailing column.
                }
                _ => {
                    let expr = self.scalar_expr(desc, Clause::Select)?;
                    columns.push(OutputColumn {
                        name: select_alias(desc),
                        aggregated: aggregated(expr.as_str()),
                        expr,
                        role: ColumnRole::Selected,
                    });
                }
            }
        }

        let mut group_key_slots = Vec::new();
        let mut deferred_groups = Vec::new();
        if !deferred_group_descs.is_empty() {
            // The second grouping pass needs every key as an output column.
            for (desc, expr) in &relational_keys {
                let slot = match columns
                    .iter()
                    .position(|c| c.role == ColumnRole::Selected && &c.expr == expr)
                {
                    Some(slot) => slot,
                    None => {
                        columns.push(OutputColumn {
                            name: select_alias(desc),
                            expr: expr.clone(),
                            role: ColumnRole::GroupKey,
                            aggregated: false,
                        });
                        columns.len() - 1
                    }
                };
                if !group_key_slots.contains(&slot) {
                    group_key_slots.push(slot);
                }
            }
            for desc in deferred_group_descs {
                let FieldSource::External { func } = &desc.source else {
                    continue;
                };
                let alias = sanitize_alias(&desc.field);
                let slot = match columns
                    .iter()
                    .position(|c| c.role == ColumnRole::Deferred && c.name == alias)
                {
                    Some(slot) => slot,
                    None => {
                        columns.push(OutputColumn {
                            name: alias.clone(),
                            expr: id_expr.clone(),
                            role: ColumnRole::Deferred,
                            aggregated: aggregated(id_expr.as_str()),
                        });
                        columns.len() - 1
                    }
                };
                deferred_groups.push(DeferredField {
                    field: desc.field.clone(),
                    alias,
                    func: func.clone(),
                    slot: Some(slot),
                });
            }
        } else {
            for (_, expr) in &relational_keys {
                if let Some(slot) = columns
                    .iter()
                    .position(|c| c.role == ColumnRole::Selected && &c.expr == expr)
                {
                    if !group_key_slots.contains(&slot) {
                        group_key_slots.push(slot);
                    }
                }
            }
        }

        let mut predicates = Vec::new();
        let mut params = Vec::new();
        let mut deferred_filters = Vec::new();
        for desc in filter {
            match &desc.source {
                FieldSource::External { func } => deferred_filters.push(DeferredField {
                    field: desc.field.clone(),
                    alias: sanitize_alias(&desc.field),
                    func: func.clone(),
                    slot: None,
                }),
                source => {
                    let expr = self.scalar_expr(desc, Clause::Filter)?;
                    let value = desc.value.clone().ok_or_else(|| {
                        QueryError::compilation(&desc.field, Clause::Filter, "filter requires a value")
                    })?;
                    // Both sides go through SQLite's own text rendering so
                    // 1.0 matches a stored 1.0 rather than Rust's "1".
                    let placeholder = match source {
                        FieldSource::JsonPath { .. } => "CAST(? AS TEXT)",
                        _ => "?",
                    };
                    predicates.push(format!("{expr} {} {placeholder}", desc.operator.sql()));
                    params.push(value);
                }
            }
        }

        let needs_artifacts = !deferred_selects.is_empty()
            || !deferred_filters.is_empty()
            || !deferred_groups.is_empty();
        if needs_artifacts {
            columns.push(OutputColumn {
                name: RUN_ID_ALIAS.into(),
                aggregated: aggregated(id_expr.as_str()),
                expr: id_expr.clone(),
                role: ColumnRole::RunId,
            });
        }
        let artifact_expr = self.config.artifact_column.clone();
        columns.push(OutputColumn {
            name: self.config.artifact_column.clone(),
            aggregated: aggregated(artifact_expr.as_str()),
            expr: artifact_expr,
            role: ColumnRole::Artifact,
        });

        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(QueryError::compilation(
                &dup.name,
                Clause::Select,
                format!("output column '{}' is produced more than once", dup.name),
            ));
        }

        let reducers = self.resolve_reducers(select, &columns, aggregate)?;

        let arrival = &self.config.arrival_column;
        let select_list: Vec<String> = columns
            .iter()
            .map(|c| {
                if c.aggregated {
                    format!("json_group_array({} ORDER BY {arrival}) AS \"{}\"", c.expr, c.name)
                } else {
                    format!("{} AS \"{}\"", c.expr, c.name)
                }
            })
            .collect();
        let where_clause = if predicates.is_empty() {
            "1=1".to_string()
        } else {
            predicates.join(" AND ")
        };
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select_list.join(", "),
            self.config.table,
            where_clause
        );
        if grouped {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_exprs.join(", "));
            sql.push_str(&format!(" ORDER BY MIN({arrival})"));
        }

        let plan_hash = plan_hash(&sql, &params);
        debug!(
            sql = %sql,
            params = params.len(),
            deferred_selects = deferred_selects.len(),
            deferred_filters = deferred_filters.len(),
            deferred_groups = deferred_groups.len(),
            "query.compile"
        );

        Ok(CompiledQuery {
            sql,
            params,
            columns,
            grouped,
            group_key_slots,
            deferred_selects,
            deferred_filters,
            deferred_groups,
            reducers,
            plan_hash,
        })
    }

    fn scalar_expr(&self, desc: &FieldDescriptor, clause: Clause) -> Result<String> {
        match &desc.source {
            FieldSource::Row { column } => {
                self.check_identifier(column, clause)
                    .map_err(|_| unsafe_identifier(&desc.field, clause, column))?;
                Ok(column.clone())
            }
            FieldSource::JsonPath { blob, key } => {
                self.check_identifier(blob, clause)
                    .map_err(|_| unsafe_identifier(&desc.field, clause, blob))?;
                Ok(format!("CAST({blob} ->> '{}' AS TEXT)", key.replace('\'', "''")))
            }
            FieldSource::External { .. } => Err(QueryError::compilation(
                &desc.field,
                clause,
                "function fields have no relational expression",
            )),
        }
    }

    fn check_identifier(&self, ident: &str, clause: Clause) -> Result<()> {
        if is_identifier(ident) {
            Ok(())
        } else {
            Err(unsafe_identifier(ident, clause, ident))
        }
    }

    fn resolve_reducers(
        &self,
        select: &[FieldDescriptor],
        columns: &[OutputColumn],
        aggregate: &BTreeMap<String, ReducerSpec>,
    ) -> Result<Vec<(usize, Reducer)>> {
        let mut reducers = Vec::new();
        for (target, spec) in aggregate {
            let alias = select
                .iter()
                .find(|d| &d.field == target)
                .map(select_alias)
                .unwrap_or_else(|| target.clone());
            let Some(slot) = columns.iter().position(|c| c.name == alias) else {
                return Err(QueryError::compilation(
                    target,
                    Clause::Aggregate,
                    "no output column with this name",
                ));
            };
            let reducer = match spec {
                ReducerSpec::Callable(reducer) => reducer.clone(),
                ReducerSpec::Named(name) => builtin_reducer(name).ok_or_else(|| {
                    QueryError::compilation(target, Clause::Aggregate, format!("unknown reducer '{name}'"))
                })?,
            };
            reducers.push((slot, reducer));
        }
        Ok(reducers)
    }
}

fn select_alias(desc: &FieldDescriptor) -> String {
    match &desc.source {
        FieldSource::Row { column } => column.clone(),
        _ => sanitize_alias(&desc.field),
    }
}

fn unsafe_identifier(field: &str, clause: Clause, ident: &str) -> QueryError {
    QueryError::compilation(field, clause, format!("'{ident}' is not a plain column identifier"))
}

/// `true` for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Deterministic column alias for a field path: `config.lr` -> `config_lr`.
pub fn sanitize_alias(field: &str) -> String {
    let mut alias: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if alias.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        alias.insert(0, '_');
    }
    alias
}

fn plan_hash(sql: &str, params: &[Value]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write(sql.as_bytes());
    for param in params {
        hasher.write(param.group_key().as_bytes());
    }
    hasher.finish()
}
