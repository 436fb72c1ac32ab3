//! External-artifact stage.
//!
//! Every member row carrying deferred work is resolved independently: its
//! artifact is loaded, deferred filters run in declaration order, then
//! deferred selections and deferred group keys are written into their
//! placeholder slots. A member whose artifact or caller function fails is
//! dropped and logged; the rest of the call continues.

use std::path::PathBuf;
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::QueryOptions;
use crate::query::artifact::ArtifactLoader;
use crate::query::dataset::Dataset;
use crate::query::errors::{QueryError, Result};
use crate::query::planner::{ColumnRole, CompiledQuery, DeferredField};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::reconcile::Row;
use crate::query::Value;

/// A run removed from the result because its artifact could not be used.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DroppedRun {
    /// Run identifier.
    pub run_id: String,
    /// Resolved artifact path, if the run had one.
    pub path: Option<PathBuf>,
    /// Why the run was dropped.
    pub reason: String,
}

/// Result of staging one member row.
#[derive(Clone, Debug)]
pub enum MemberOutcome {
    /// Row with deferred values filled in.
    Kept(Row),
    /// Row rejected by a deferred filter under strict filtering.
    Filtered,
    /// Row dropped after an artifact failure.
    Dropped(DroppedRun),
}

/// Resolves deferred fields for member rows of one compiled query.
pub struct ArtifactStage<'a> {
    compiled: &'a CompiledQuery,
    loader: &'a dyn ArtifactLoader,
    options: &'a QueryOptions,
    run_id_slot: usize,
    artifact_slot: usize,
}

impl<'a> ArtifactStage<'a> {
    /// Binds the stage to a plan. The plan must carry deferred work.
    pub fn new(
        compiled: &'a CompiledQuery,
        loader: &'a dyn ArtifactLoader,
        options: &'a QueryOptions,
    ) -> Result<Self> {
        let missing = |what: &str| {
            QueryError::validation(what, "compiled plan lacks the column needed by the artifact stage")
        };
        let run_id_slot = compiled
            .slot_of(ColumnRole::RunId)
            .ok_or_else(|| missing("__run_id"))?;
        let artifact_slot = compiled
            .slot_of(ColumnRole::Artifact)
            .ok_or_else(|| missing("artifact"))?;
        Ok(Self {
            compiled,
            loader,
            options,
            run_id_slot,
            artifact_slot,
        })
    }

    /// Stages every member, preserving input order in the output.
    ///
    /// Only contract violations (a filter returning a non-boolean) are
    /// returned as errors.
    pub fn run(&self, members: Vec<Row>) -> Result<Vec<MemberOutcome>> {
        let workers = self.options.artifact_workers.max(1);
        if workers == 1 || members.len() <= 1 {
            return members.into_iter().map(|row| self.stage(row)).collect();
        }

        let chunk_size = members.len().div_ceil(workers);
        let mut chunks: Vec<Vec<Row>> = Vec::with_capacity(workers);
        let mut rest = members.into_iter().peekable();
        while rest.peek().is_some() {
            chunks.push(rest.by_ref().take(chunk_size).collect());
        }
        debug!(members = chunks.iter().map(Vec::len).sum::<usize>(), threads = chunks.len(), "artifact.parallel");

        let staged: Vec<Result<MemberOutcome>> = thread::scope(|s| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    s.spawn(move || chunk.into_iter().map(|row| self.stage(row)).collect::<Vec<_>>())
                })
                .collect();
            let mut out = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(outcomes) => out.extend(outcomes),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            out
        });
        staged.into_iter().collect()
    }

    /// Stages a single member row.
    pub fn stage(&self, mut row: Row) -> Result<MemberOutcome> {
        let run_id = row
            .get(self.run_id_slot)
            .map(|v| v.to_text().unwrap_or_default())
            .unwrap_or_default();
        let reference = row.get(self.artifact_slot).and_then(Value::as_str);
        let Some(reference) = reference else {
            return Ok(self.drop_run(run_id, None, "run has no artifact reference".into()));
        };
        let path = self.options.resolve_artifact(reference);

        let start = profile_timer();
        let loaded = self.loader.load(&path);
        record_profile_timer(QueryProfileKind::ArtifactLoad, start);
        let mut dataset = match loaded {
            Ok(dataset) => dataset,
            Err(err) => return Ok(self.drop_run(run_id, Some(path), err.to_string())),
        };

        let mut rejected = false;
        for filter in &self.compiled.deferred_filters {
            let verdict = match self.evaluate(filter, &dataset) {
                Ok(value) => value,
                Err(reason) => return Ok(self.drop_run(run_id, Some(path), reason)),
            };
            match verdict {
                Value::Bool(true) => {}
                Value::Bool(false) => {
                    dataset = dataset.empty_like();
                    rejected = true;
                    break;
                }
                other => {
                    return Err(QueryError::validation(
                        &filter.field,
                        format!("filter function returned {other} for run '{run_id}', expected a boolean"),
                    ))
                }
            }
        }
        if rejected && self.options.strict_filters {
            debug!(run_id = %run_id, "artifact.filtered");
            return Ok(MemberOutcome::Filtered);
        }

        for deferred in self
            .compiled
            .deferred_selects
            .iter()
            .chain(self.compiled.deferred_groups.iter())
        {
            let value = match self.evaluate(deferred, &dataset) {
                Ok(value) => value,
                Err(reason) => return Ok(self.drop_run(run_id, Some(path), reason)),
            };
            if let Some(cell) = deferred.slot.and_then(|slot| row.get_mut(slot)) {
                *cell = value;
            }
        }
        Ok(MemberOutcome::Kept(row))
    }

    fn evaluate(&self, deferred: &DeferredField, dataset: &Dataset) -> std::result::Result<Value, String> {
        let start = profile_timer();
        let result = deferred.func.call(dataset);
        record_profile_timer(QueryProfileKind::ArtifactEval, start);
        result.map_err(|err| format!("function for '{}' failed: {err}", deferred.field))
    }

    fn drop_run(&self, run_id: String, path: Option<PathBuf>, reason: String) -> MemberOutcome {
        let err = QueryError::ArtifactLoad {
            run_id: run_id.clone(),
            path: path.clone().unwrap_or_default(),
            reason: reason.clone(),
        };
        warn!(
            run_id = %run_id,
            path = ?path,
            code = err.code(),
            error = %err,
            "artifact.load_failed"
        );
        MemberOutcome::Dropped(DroppedRun {
            run_id,
            path,
            reason,
        })
    }
}
