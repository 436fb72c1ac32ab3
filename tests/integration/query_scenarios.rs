#![allow(missing_docs)]

mod common;

use common::{Fixture, RunSeed};
use rusqlite::Connection;
use runquery::query::ast::FieldSpec;
use runquery::query::{QueryBuilder, QueryRequest, Value};
use serde_json::json;

fn s(v: &str) -> Value {
    Value::from(v)
}

#[test]
fn json_path_selects_return_text() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("run-a").config(json!({"lr": 0.1})))
        .insert(RunSeed::new("run-b").config(json!({"lr": 0.01})));

    let request = QueryBuilder::new().select("id").select("config.lr").build();
    let result = fx.executor().execute(&request).expect("execute");
    let frame = result.frame;

    assert_eq!(frame.column_names(), &["id", "config_lr", "file_path"]);
    assert_eq!(frame.num_rows(), 2);
    assert_eq!(frame.get(0, "id"), Some(&s("run-a")));
    assert_eq!(frame.get(0, "config_lr"), Some(&s("0.1")));
    assert_eq!(frame.get(1, "id"), Some(&s("run-b")));
    assert_eq!(frame.get(1, "config_lr"), Some(&s("0.01")));
}

#[test]
fn ungrouped_frames_have_one_scalar_row_per_run() {
    let fx = Fixture::new();
    for id in ["a", "b", "c", "d"] {
        fx.insert(RunSeed::new(id).summary(json!({"acc": 0.5})));
    }
    let request = QueryBuilder::new()
        .select("id")
        .select("entity")
        .select("summary.acc")
        .build();
    let result = fx.executor().execute(&request).expect("execute");
    assert_eq!(result.frame.num_rows(), 4);
    assert!(!result.frame.is_grouped());
    for row in result.frame.rows() {
        assert!(row.iter().all(|v| !matches!(v, Value::List(_))));
    }
}

#[test]
fn not_equal_filter_excludes_only_the_matching_text() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("exact").summary(json!({"test_accuracy": 0.85})))
        .insert(RunSeed::new("higher").summary(json!({"test_accuracy": 0.9})))
        .insert(RunSeed::new("missing").summary(json!({})));

    let request = QueryRequest::from_json(
        r#"{
            "select": ["id"],
            "filter": [{"field": "summary.test_accuracy", "operator": "!=", "value": "0.85"}]
        }"#,
    )
    .expect("request");
    let result = fx.executor().execute(&request).expect("execute");
    let ids: Vec<&Value> = result.frame.column("id").expect("id column");
    assert_eq!(ids, vec![&s("higher"), &s("missing")]);
}

#[test]
fn filter_values_are_bound_not_interpolated() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a").project("o'brien"))
        .insert(RunSeed::new("b").project("vision"));
    let request = QueryBuilder::new()
        .select("id")
        .filter_eq("project", "o'brien")
        .build();
    let result = fx.executor().execute(&request).expect("execute");
    assert_eq!(result.frame.column("id").unwrap(), vec![&s("a")]);

    let hostile = QueryBuilder::new()
        .select("id")
        .filter_eq("project", "x' OR '1'='1")
        .build();
    assert!(fx.executor().execute(&hostile).expect("execute").frame.is_empty());
}

#[test]
fn grouped_columns_collect_members_in_arrival_order() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("z").config(json!({"lr": 0.1})))
        .insert(RunSeed::new("q").config(json!({"lr": 0.01})))
        .insert(RunSeed::new("m").config(json!({"lr": 0.1})))
        .insert(RunSeed::new("a").config(json!({"lr": 0.1})));

    let request = QueryBuilder::new()
        .select("config.lr")
        .select("id")
        .group_by("config.lr")
        .build();
    let frame = fx.executor().execute(&request).expect("execute").frame;
    assert!(frame.is_grouped());

    // Groups follow their first member, not the key order.
    let keys: Vec<&Value> = frame.column("config_lr").expect("key column");
    assert_eq!(keys, vec![&s("0.1"), &s("0.01")]);
    assert_eq!(
        frame.get(0, "id"),
        Some(&Value::List(vec![s("z"), s("m"), s("a")]))
    );
    assert_eq!(frame.get(1, "id"), Some(&Value::List(vec![s("q")])));
    let Some(Value::List(paths)) = frame.get(0, "file_path") else {
        panic!("artifact column should be collected too");
    };
    assert_eq!(paths.len(), 3);
}

#[test]
fn numeric_json_filters_match_stored_rendering() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("one").config(json!({"lr": 1.0, "epochs": 3})))
        .insert(RunSeed::new("tiny").config(json!({"lr": 0.00001, "epochs": 10})))
        .insert(RunSeed::new("flag").config(json!({"lr": 0.1, "warm": true})));
    let executor = fx.executor();
    let ids = |request: QueryRequest| -> Vec<Value> {
        executor
            .execute(&request)
            .expect("execute")
            .frame
            .column("id")
            .expect("id")
            .into_iter()
            .cloned()
            .collect()
    };

    let by_float = QueryBuilder::new().select("id").filter_eq("config.lr", 1.0).build();
    assert_eq!(ids(by_float), vec![s("one")]);
    let by_small = QueryBuilder::new().select("id").filter_eq("config.lr", 0.00001).build();
    assert_eq!(ids(by_small), vec![s("tiny")]);
    let by_int = QueryBuilder::new().select("id").filter_eq("config.epochs", 10i64).build();
    assert_eq!(ids(by_int), vec![s("tiny")]);
    let by_bool = QueryBuilder::new().select("id").filter_eq("config.warm", true).build();
    assert_eq!(ids(by_bool), vec![s("flag")]);
    let by_text = QueryBuilder::new().select("id").filter_eq("config.lr", "1.0").build();
    assert_eq!(ids(by_text), vec![s("one")]);
}

#[test]
fn dotted_json_keys_are_single_labels() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a").config(json!({"opt": {"beta": 0.9}, "opt.eps": 0.001})));
    let frame = QueryBuilder::new()
        .select("config.opt.beta")
        .select("config.opt.eps")
        .execute(&fx.executor())
        .expect("execute")
        .frame;
    assert_eq!(frame.get(0, "config_opt_beta"), Some(&Value::Null));
    assert_eq!(frame.get(0, "config_opt_eps"), Some(&s("0.001")));
}

#[test]
fn colliding_output_columns_are_rejected() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a"));
    let frame = QueryBuilder::new()
        .select("id")
        .select("file_path")
        .execute(&fx.executor())
        .expect("execute")
        .frame;
    assert_eq!(frame.column_names(), &["id", "file_path"]);

    let err = QueryBuilder::new()
        .select("project")
        .select("project")
        .execute(&fx.executor())
        .unwrap_err();
    assert_eq!(err.code(), "CompilationError");
}

#[test]
fn grouping_by_a_selected_row_column_keeps_it_scalar() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a").entity("alpha").summary(json!({"acc": 0.5})))
        .insert(RunSeed::new("b").entity("alpha").summary(json!({"acc": 0.7})))
        .insert(RunSeed::new("c").entity("beta").summary(json!({"acc": 0.9})));

    let request = QueryBuilder::new()
        .select("entity")
        .select("summary.acc")
        .group_by("entity")
        .aggregate("summary.acc", "mean")
        .build();
    let frame = fx.executor().execute(&request).expect("execute").frame;
    let alpha = (0..frame.num_rows())
        .find(|idx| frame.get(*idx, "entity") == Some(&s("alpha")))
        .expect("alpha group");
    match frame.get(alpha, "summary_acc") {
        Some(Value::Float(mean)) => assert!((mean - 0.6).abs() < 1e-9),
        other => panic!("expected reduced mean, got {other:?}"),
    }
}

#[test]
fn row_only_queries_round_trip_direct_reads() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a").entity("alpha").project("p1"))
        .insert(RunSeed::new("b").entity("beta").project("p2"))
        .insert(RunSeed::new("c").entity("gamma").project("p1"));

    let request = QueryBuilder::new()
        .select("id")
        .select("entity")
        .select("project")
        .select("group_name")
        .build();
    let frame = fx.executor().execute(&request).expect("execute").frame;

    let conn = Connection::open(&fx.db).expect("open");
    let mut stmt = conn
        .prepare("SELECT id, entity, project, group_name FROM runs")
        .expect("prepare");
    let direct: Vec<Vec<Value>> = stmt
        .query_map([], |row| {
            Ok((0..4)
                .map(|idx| row.get::<_, String>(idx).map(Value::from))
                .collect::<Result<Vec<_>, _>>()?)
        })
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");

    let via_engine: Vec<Vec<Value>> = frame
        .rows()
        .iter()
        .map(|row| row[..4].to_vec())
        .collect();
    assert_eq!(via_engine, direct);
}

#[test]
fn malformed_requests_fail_before_io() {
    let fx = Fixture::new();
    let executor = fx.executor();

    let nameless = QueryRequest {
        select: vec![FieldSpec::Name("  ".into())],
        ..QueryRequest::default()
    };
    assert_eq!(executor.execute(&nameless).unwrap_err().code(), "ValidationError");

    let bad_type = QueryRequest::from_json(r#"{"select": [{"field": "id", "type": "vector"}]}"#)
        .expect("parses");
    assert_eq!(executor.execute(&bad_type).unwrap_err().code(), "CompilationError");

    let fn_without_fn = QueryRequest::from_json(r#"{"select": [{"field": "x", "type": "function"}]}"#)
        .expect("parses");
    assert_eq!(executor.execute(&fn_without_fn).unwrap_err().code(), "CompilationError");

    assert_eq!(
        QueryRequest::from_json(r#"{"select": [42]}"#).unwrap_err().code(),
        "ValidationError"
    );
}

#[test]
fn missing_columns_are_store_errors() {
    let fx = Fixture::new();
    fx.insert(RunSeed::new("a"));
    let request = QueryBuilder::new().select("no_such_column").build();
    assert_eq!(fx.executor().execute(&request).unwrap_err().code(), "StoreError");
}
