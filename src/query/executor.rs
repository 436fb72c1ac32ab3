//! Pipeline driver: compile, query the store, stage artifacts, reconcile.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::QueryOptions;
use crate::query::artifact::{ArtifactLoader, FileLoader};
use crate::query::ast::QueryRequest;
use crate::query::errors::Result;
use crate::query::frame::Frame;
use crate::query::functions::FunctionRegistry;
use crate::query::planner::{CompiledQuery, Planner, PlannerConfig, QueryExplain};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::reconcile::{
    apply_reducers, collapse_groups, decode_relational, explode, regroup, Row,
};
use crate::query::stage::{ArtifactStage, DroppedRun, MemberOutcome};
use crate::store::{RunStore, SqliteRunStore};

/// Diagnostics collected while executing one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryStats {
    /// Rows returned by the relational query.
    pub relational_rows: usize,
    /// Runs whose artifact was loaded and evaluated.
    pub artifacts_loaded: usize,
    /// Runs removed by a deferred filter under strict filtering.
    pub filtered_runs: usize,
    /// Runs dropped after an artifact failure, in arrival order.
    pub dropped_runs: Vec<DroppedRun>,
    /// Hex hash of the executed plan.
    pub plan_hash: String,
}

/// Frame plus diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct QueryResult {
    /// The reconciled result.
    pub frame: Frame,
    /// What happened on the way.
    pub stats: QueryStats,
}

/// Executes [`QueryRequest`]s against a run store and an artifact loader.
pub struct Executor {
    store: Arc<dyn RunStore>,
    loader: Arc<dyn ArtifactLoader>,
    planner: Planner,
    registry: FunctionRegistry,
    options: QueryOptions,
}

impl Executor {
    /// Creates an executor with default options and the built-in functions.
    pub fn new(store: Arc<dyn RunStore>, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            store,
            loader,
            planner: Planner::default(),
            registry: FunctionRegistry::new(),
            options: QueryOptions::default(),
        }
    }

    /// Executor over a SQLite file, loading artifacts by file extension.
    pub fn open_sqlite(path: impl AsRef<Path>, options: QueryOptions) -> Result<Self> {
        let store = SqliteRunStore::open(path, options.store_options())?;
        Ok(Self::new(Arc::new(store), Arc::new(FileLoader)).with_options(options))
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the function registry used for named `fn` references.
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the store layout the planner compiles against.
    pub fn with_planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner = Planner::new(config);
        self
    }

    /// Current options.
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Mutable access to the function registry.
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// Normalizes and compiles without touching the store.
    pub fn compile(&self, request: &QueryRequest) -> Result<CompiledQuery> {
        self.planner.plan(request, &self.registry)
    }

    /// Compiles and describes the plan without executing it.
    pub fn explain(&self, request: &QueryRequest) -> Result<QueryExplain> {
        Ok(self.compile(request)?.explain())
    }

    /// Runs the full pipeline.
    pub fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        let compiled = self.compile(request)?;

        let start = profile_timer();
        let raw = self.store.execute(&compiled.sql, &compiled.params);
        record_profile_timer(QueryProfileKind::Store, start);
        let rows = decode_relational(&compiled, raw?)?;

        let mut stats = QueryStats {
            relational_rows: rows.len(),
            plan_hash: format!("{:016x}", compiled.plan_hash),
            ..QueryStats::default()
        };
        let grouped = compiled.grouped;
        let (mut rows, collected) = if compiled.needs_artifacts() {
            self.resolve_deferred(&compiled, rows, &mut stats)?
        } else {
            let collected = compiled.aggregated_flags();
            (rows, collected)
        };
        if grouped {
            apply_reducers(&mut rows, &compiled.reducers, &collected);
        }

        let frame = Frame::from_compiled(&compiled, rows, grouped);
        info!(
            rows = frame.num_rows(),
            relational_rows = stats.relational_rows,
            dropped = stats.dropped_runs.len(),
            plan = %stats.plan_hash,
            "query.execute"
        );
        Ok(QueryResult { frame, stats })
    }

    /// Stages member rows and reconciles them. Returns the rows plus the
    /// per-column "holds a collected list" flags.
    fn resolve_deferred(
        &self,
        compiled: &CompiledQuery,
        rows: Vec<Row>,
        stats: &mut QueryStats,
    ) -> Result<(Vec<Row>, Vec<bool>)> {
        let aggregated = compiled.aggregated_flags();
        let mut owners = Vec::new();
        let mut members = Vec::new();
        for (group, row) in rows.into_iter().enumerate() {
            if compiled.grouped {
                for member in explode(&row, &aggregated) {
                    owners.push(group);
                    members.push(member);
                }
            } else {
                owners.push(group);
                members.push(row);
            }
        }
        debug!(members = members.len(), "artifact.stage");

        let stage = ArtifactStage::new(compiled, self.loader.as_ref(), &self.options)?;
        let outcomes = stage.run(members)?;
        let mut survivors = Vec::with_capacity(outcomes.len());
        for (owner, outcome) in owners.into_iter().zip(outcomes) {
            match outcome {
                MemberOutcome::Kept(row) => {
                    stats.artifacts_loaded += 1;
                    survivors.push((owner, row));
                }
                MemberOutcome::Filtered => {
                    stats.artifacts_loaded += 1;
                    stats.filtered_runs += 1;
                }
                MemberOutcome::Dropped(dropped) => stats.dropped_runs.push(dropped),
            }
        }

        let start = profile_timer();
        let reconciled = if !compiled.deferred_groups.is_empty() {
            let keys = compiled.regroup_key_slots();
            let flat = survivors.into_iter().map(|(_, row)| row).collect();
            let collected: Vec<bool> = (0..compiled.columns.len())
                .map(|slot| !keys.contains(&slot))
                .collect();
            (regroup(flat, &keys), collected)
        } else if compiled.grouped {
            (collapse_groups(survivors, &aggregated), aggregated)
        } else {
            (survivors.into_iter().map(|(_, row)| row).collect(), aggregated)
        };
        record_profile_timer(QueryProfileKind::Reconcile, start);
        Ok(reconciled)
    }
}
