#![allow(missing_docs)]

mod common;

use common::{Fixture, RunSeed};
use runquery::query::dataset::{Dataset, DatasetError};
use runquery::query::{QueryBuilder, QueryRequest, Value};
use runquery::QueryOptions;

fn last_loss(ds: &Dataset) -> Result<Value, DatasetError> {
    Ok(ds
        .column("loss")?
        .last()
        .cloned()
        .unwrap_or(Value::Null))
}

fn converged(ds: &Dataset) -> Result<Value, DatasetError> {
    let losses = ds.column_f64("loss")?;
    Ok(Value::Bool(losses.last().is_some_and(|l| *l < 0.5)))
}

fn seeded() -> Fixture {
    let fx = Fixture::new();
    let good = fx.history("a/history.csv", &[0.9, 0.6, 0.3]);
    let slow = fx.history("c/history.csv", &[0.9, 0.8, 0.7]);
    let broken = fx.write("b/history.bin", "not an artifact");
    fx.insert(RunSeed::new("a").artifact(&good))
        .insert(RunSeed::new("b").artifact(&broken))
        .insert(RunSeed::new("c").artifact(&slow))
        .insert(RunSeed::new("d").artifact(fx.dir.path().join("d/missing.csv")))
        .insert(RunSeed::new("e"));
    fx
}

#[test]
fn unusable_artifacts_drop_only_their_run() {
    let fx = seeded();
    let result = QueryBuilder::new()
        .select("id")
        .select_fn("final_loss", last_loss)
        .execute(&fx.executor())
        .expect("execute");

    assert_eq!(result.stats.relational_rows, 5);
    assert_eq!(result.stats.artifacts_loaded, 2);
    let ids: Vec<&Value> = result.frame.column("id").expect("id");
    assert_eq!(ids, vec![&Value::from("a"), &Value::from("c")]);
    assert_eq!(result.frame.get(0, "final_loss"), Some(&Value::Float(0.3)));
    assert_eq!(result.frame.get(1, "final_loss"), Some(&Value::Float(0.7)));

    let dropped: Vec<&str> = result
        .stats
        .dropped_runs
        .iter()
        .map(|d| d.run_id.as_str())
        .collect();
    assert_eq!(dropped, vec!["b", "d", "e"]);
    assert!(result.stats.dropped_runs[2].path.is_none());
    assert!(!result
        .frame
        .column_names()
        .iter()
        .any(|name| name.starts_with("__")));
}

#[test]
fn rejected_runs_see_an_empty_artifact() {
    let fx = seeded();
    let result = QueryBuilder::new()
        .select("id")
        .select_fn("steps", |ds: &Dataset| Ok(Value::Int(ds.num_rows() as i64)))
        .filter_fn("converged", converged)
        .execute(&fx.executor())
        .expect("execute");

    let ids: Vec<&Value> = result.frame.column("id").expect("id");
    assert_eq!(ids, vec![&Value::from("a"), &Value::from("c")]);
    assert_eq!(result.frame.get(0, "steps"), Some(&Value::Int(3)));
    assert_eq!(result.frame.get(1, "steps"), Some(&Value::Int(0)));
    assert_eq!(result.stats.filtered_runs, 0);
}

#[test]
fn strict_filtering_removes_rejected_runs() {
    let fx = seeded();
    let executor = fx.executor_with(QueryOptions::default().with_strict_filters(true));
    let result = QueryBuilder::new()
        .select("id")
        .filter_fn("converged", converged)
        .execute(&executor)
        .expect("execute");

    let ids: Vec<&Value> = result.frame.column("id").expect("id");
    assert_eq!(ids, vec![&Value::from("a")]);
    assert_eq!(result.stats.filtered_runs, 1);
    assert_eq!(result.stats.dropped_runs.len(), 3);
}

#[test]
fn non_boolean_filter_results_fail_the_call() {
    let fx = seeded();
    let err = QueryBuilder::new()
        .select("id")
        .filter_fn("loss", last_loss)
        .execute(&fx.executor())
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[test]
fn failing_functions_drop_the_run() {
    let fx = seeded();
    let result = QueryBuilder::new()
        .select("id")
        .select_fn("acc", |ds: &Dataset| Ok(Value::List(ds.column("accuracy")?.to_vec())))
        .execute(&fx.executor())
        .expect("execute");
    assert!(result.frame.is_empty());
    assert_eq!(result.stats.dropped_runs.len(), 5);
    assert!(result.stats.dropped_runs[0].reason.contains("accuracy"));
}

#[test]
fn parallel_staging_matches_sequential() {
    let fx = Fixture::new();
    for idx in 0..24 {
        let id = format!("run-{idx:02}");
        let losses = [1.5, 0.3 + idx as f64 / 100.0];
        let path = fx.history(&format!("{id}/history.csv"), &losses);
        fx.insert(RunSeed::new(&id).artifact(&path));
    }
    let request = QueryBuilder::new()
        .select("id")
        .select_fn("final_loss", last_loss)
        .filter_fn("converged", converged)
        .build();

    let sequential = fx.executor().execute(&request).expect("sequential");
    let parallel = fx
        .executor_with(QueryOptions::parallel(4))
        .execute(&request)
        .expect("parallel");
    assert_eq!(sequential.frame.rows(), parallel.frame.rows());
    assert_eq!(sequential.stats, parallel.stats);
    assert_eq!(parallel.frame.num_rows(), 24);
}

#[test]
fn relative_references_resolve_against_the_artifact_root() {
    let fx = Fixture::new();
    fx.history("store/a.csv", &[0.4, 0.2]);
    fx.insert(RunSeed::new("a").artifact_ref("a.csv"));

    let request = QueryBuilder::new()
        .select("id")
        .select_fn("final_loss", last_loss)
        .build();

    let unrooted = fx.executor().execute(&request).expect("execute");
    assert!(unrooted.frame.is_empty());
    assert_eq!(unrooted.stats.dropped_runs.len(), 1);

    let rooted = fx
        .executor_with(QueryOptions::default().with_artifact_root(fx.dir.path().join("store")))
        .execute(&request)
        .expect("execute");
    assert_eq!(rooted.frame.get(0, "final_loss"), Some(&Value::Float(0.2)));
}

#[test]
fn registered_functions_resolve_by_name() {
    let fx = seeded();
    let request = QueryRequest::from_json(
        r#"{
            "select": ["id", {"field": "loss", "fn": "trajectory:loss"}],
            "filter": [{"field": "project", "value": "vision"}]
        }"#,
    )
    .expect("request");
    let result = fx.executor().execute(&request).expect("execute");
    assert_eq!(
        result.frame.get(0, "loss"),
        Some(&Value::List(vec![
            Value::Float(0.9),
            Value::Float(0.6),
            Value::Float(0.3)
        ]))
    );

    let unknown = QueryRequest::from_json(r#"{"select": [{"field": "x", "fn": "median:loss"}]}"#)
        .expect("request");
    assert_eq!(fx.executor().execute(&unknown).unwrap_err().code(), "CompilationError");
}
