#![allow(missing_docs)]

mod common;

use common::{Fixture, RunSeed};
use runquery::query::dataset::{Dataset, DatasetError};
use runquery::query::{QueryBuilder, QueryRequest, Value};
use serde_json::json;

fn converged(ds: &Dataset) -> Result<Value, DatasetError> {
    let losses = ds.column_f64("loss")?;
    Ok(Value::Bool(losses.last().is_some_and(|l| *l < 0.5)))
}

fn floats(xs: &[f64]) -> Value {
    Value::List(xs.iter().copied().map(Value::Float).collect())
}

fn list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::List(items)) => items.clone(),
        other => panic!("expected a collected list, got {other:?}"),
    }
}

#[test]
fn grouped_trajectories_are_collected_per_group() {
    let fx = Fixture::new();
    let a = fx.history("a.csv", &[0.9, 0.4]);
    let b = fx.history("b.csv", &[0.8, 0.6]);
    fx.insert(RunSeed::new("a").config(json!({"lr": 0.1})).artifact(&a))
        .insert(RunSeed::new("b").config(json!({"lr": 0.1})).artifact(&b));

    let request = QueryRequest::from_json(
        r#"{
            "select": ["config.lr", {"field": "loss_curve", "fn": "trajectory:loss"}],
            "group_by": ["config.lr"]
        }"#,
    )
    .expect("request");
    let result = fx.executor().execute(&request).expect("execute");
    let frame = result.frame;

    assert_eq!(frame.num_rows(), 1);
    assert_eq!(frame.get(0, "config_lr"), Some(&Value::from("0.1")));
    assert_eq!(
        list(frame.get(0, "loss_curve")),
        vec![floats(&[0.9, 0.4]), floats(&[0.8, 0.6])]
    );
    assert_eq!(result.stats.artifacts_loaded, 2);
}

#[test]
fn failed_members_leave_every_collected_column() {
    let fx = Fixture::new();
    let a = fx.history("a.csv", &[0.9, 0.4]);
    let c = fx.history("c.csv", &[0.7, 0.3]);
    fx.insert(RunSeed::new("a").entity("alpha").artifact(&a))
        .insert(RunSeed::new("b").entity("alpha").artifact(fx.dir.path().join("gone.csv")))
        .insert(RunSeed::new("c").entity("alpha").artifact(&c));

    let frame = QueryBuilder::new()
        .select("entity")
        .select("id")
        .select("config.lr")
        .select_fn("final", |ds: &Dataset| {
            Ok(ds.column("loss")?.last().cloned().unwrap_or(Value::Null))
        })
        .group_by("entity")
        .execute(&fx.executor())
        .expect("execute")
        .frame;

    assert_eq!(frame.num_rows(), 1);
    assert_eq!(list(frame.get(0, "id")), vec![Value::from("a"), Value::from("c")]);
    assert_eq!(list(frame.get(0, "config_lr")).len(), 2);
    assert_eq!(list(frame.get(0, "final")).len(), 2);
    assert_eq!(list(frame.get(0, "file_path")).len(), 2);
}

#[test]
fn groups_without_survivors_disappear() {
    let fx = Fixture::new();
    let a = fx.history("a.csv", &[0.9, 0.4]);
    let broken = fx.write("broken.csv", "_step,loss\n0,0.5,extra\n");
    fx.insert(RunSeed::new("a").entity("alpha").artifact(&a))
        .insert(RunSeed::new("b").entity("beta").artifact(&broken))
        .insert(RunSeed::new("c").entity("beta"));

    let result = QueryBuilder::new()
        .select("entity")
        .select_fn("steps", |ds: &Dataset| Ok(Value::Int(ds.num_rows() as i64)))
        .group_by("entity")
        .execute(&fx.executor())
        .expect("execute");

    assert_eq!(result.frame.num_rows(), 1);
    assert_eq!(result.frame.get(0, "entity"), Some(&Value::from("alpha")));
    assert_eq!(result.stats.dropped_runs.len(), 2);
}

#[test]
fn deferred_keys_regroup_in_arrival_order() {
    let fx = Fixture::new();
    let curves: [(&str, &[f64]); 4] = [
        ("r1", &[0.9, 0.3]),
        ("r2", &[0.9, 0.8]),
        ("r3", &[0.9, 0.2]),
        ("r4", &[0.9, 0.7]),
    ];
    for (id, losses) in curves {
        let path = fx.history(&format!("{id}.csv"), losses);
        fx.insert(RunSeed::new(id).artifact(&path));
    }

    let frame = QueryBuilder::new()
        .select("id")
        .group_by_fn("converged", converged)
        .execute(&fx.executor())
        .expect("execute")
        .frame;

    assert!(frame.is_grouped());
    assert_eq!(frame.num_rows(), 2);
    assert_eq!(frame.get(0, "converged"), Some(&Value::Bool(true)));
    assert_eq!(list(frame.get(0, "id")), vec![Value::from("r1"), Value::from("r3")]);
    assert_eq!(frame.get(1, "converged"), Some(&Value::Bool(false)));
    assert_eq!(list(frame.get(1, "id")), vec![Value::from("r2"), Value::from("r4")]);
}

#[test]
fn relational_and_deferred_keys_combine() {
    let fx = Fixture::new();
    let seeds = [
        ("r1", "alpha", [0.9, 0.3]),
        ("r2", "alpha", [0.9, 0.8]),
        ("r3", "beta", [0.9, 0.2]),
        ("r4", "alpha", [0.9, 0.1]),
    ];
    for (id, entity, losses) in seeds {
        let path = fx.history(&format!("{id}.csv"), &losses);
        fx.insert(RunSeed::new(id).entity(entity).artifact(&path));
    }

    let frame = QueryBuilder::new()
        .select("id")
        .group_by("entity")
        .group_by_fn("converged", converged)
        .execute(&fx.executor())
        .expect("execute")
        .frame;

    let keys: Vec<(Value, Value)> = (0..frame.num_rows())
        .map(|row| {
            (
                frame.get(row, "entity").cloned().expect("entity"),
                frame.get(row, "converged").cloned().expect("converged"),
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec![
            (Value::from("alpha"), Value::Bool(true)),
            (Value::from("alpha"), Value::Bool(false)),
            (Value::from("beta"), Value::Bool(true)),
        ]
    );
    assert_eq!(list(frame.get(0, "id")), vec![Value::from("r1"), Value::from("r4")]);
    assert_eq!(list(frame.get(1, "id")), vec![Value::from("r2")]);
}

#[test]
fn reducers_replace_collected_lists() {
    let fx = Fixture::new();
    let a = fx.history("a.csv", &[0.9, 0.4]);
    let b = fx.history("b.csv", &[0.8, 0.2]);
    fx.insert(RunSeed::new("a").entity("alpha").artifact(&a))
        .insert(RunSeed::new("b").entity("alpha").artifact(&b))
        .insert(RunSeed::new("c").entity("alpha").artifact(fx.dir.path().join("gone.csv")));

    let request = QueryRequest::from_json(
        r#"{
            "select": ["entity", "id", {"field": "final", "fn": "last:loss"}],
            "group_by": ["entity"],
            "aggregate": {"id": "count", "final": "mean"}
        }"#,
    )
    .expect("request");
    let frame = fx.executor().execute(&request).expect("execute").frame;

    assert_eq!(frame.get(0, "id"), Some(&Value::Int(2)));
    match frame.get(0, "final") {
        Some(Value::Float(mean)) => assert!((mean - 0.3).abs() < 1e-9),
        other => panic!("expected mean of final losses, got {other:?}"),
    }
    assert_eq!(list(frame.get(0, "file_path")).len(), 2);
}

#[test]
fn unselected_relational_keys_become_columns_when_regrouping() {
    let fx = Fixture::new();
    let a = fx.history("a.csv", &[0.9, 0.4]);
    let b = fx.history("b.csv", &[0.8, 0.2]);
    fx.insert(RunSeed::new("a").project("p1").artifact(&a))
        .insert(RunSeed::new("b").project("p2").artifact(&b));

    let frame = QueryBuilder::new()
        .select("id")
        .select_fn("steps", |ds: &Dataset| Ok(Value::Int(ds.num_rows() as i64)))
        .group_by("project")
        .group_by_fn("converged", converged)
        .execute(&fx.executor())
        .expect("execute")
        .frame;

    let projects: Vec<&Value> = frame.column("project").expect("project column");
    assert_eq!(projects, vec![&Value::from("p1"), &Value::from("p2")]);
    assert_eq!(list(frame.get(0, "steps")), vec![Value::Int(2)]);
    assert_eq!(frame.get(1, "converged"), Some(&Value::Bool(true)));
}
