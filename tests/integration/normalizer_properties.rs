#![allow(missing_docs)]

use proptest::prelude::*;
use runquery::query::ast::{ArtifactFn, FieldSource, FieldSpec, QueryRequest};
use runquery::query::errors::Clause;
use runquery::query::normalize::normalize_one;
use runquery::query::planner::{is_identifier, sanitize_alias};
use runquery::query::{FieldKind, FunctionRegistry, Planner, Value};

fn column_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,10}"
}

fn nested_key() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,6}(\\.[a-z0-9_]{1,6}){0,2}"
}

proptest! {
    #[test]
    fn prop_dotless_names_are_row_fields(name in column_name()) {
        let desc = normalize_one(&FieldSpec::from(name.as_str()), Clause::Select, &FunctionRegistry::new())
            .expect("valid name");
        prop_assert_eq!(desc.kind(), FieldKind::Row);
        match desc.source {
            FieldSource::Row { column } => prop_assert_eq!(column, name),
            other => prop_assert!(false, "unexpected source {:?}", other),
        }
    }

    #[test]
    fn prop_dotted_names_split_at_the_first_dot(blob in column_name(), key in nested_key()) {
        let name = format!("{blob}.{key}");
        let desc = normalize_one(&FieldSpec::from(name.as_str()), Clause::Filter, &FunctionRegistry::new())
            .expect("valid path");
        match desc.source {
            FieldSource::JsonPath { blob: b, key: k } => {
                prop_assert_eq!(b, blob);
                prop_assert_eq!(k, key);
            }
            other => prop_assert!(false, "unexpected source {:?}", other),
        }
    }

    #[test]
    fn prop_functions_always_defer(name in prop_oneof![column_name(), "[a-z]{1,4}\\.[a-z]{1,4}"]) {
        let spec = FieldSpec::function(name.clone(), ArtifactFn::new(|ds| Ok(Value::Int(ds.num_rows() as i64))));
        for clause in [Clause::Select, Clause::Filter, Clause::GroupBy] {
            let desc = normalize_one(&spec, clause, &FunctionRegistry::new()).expect("function field");
            prop_assert!(desc.is_deferred());
            prop_assert_eq!(&desc.field, &name);
        }
    }

    #[test]
    fn prop_aliases_are_identifiers(field in "\\PC{1,24}") {
        prop_assert!(is_identifier(&sanitize_alias(&field)));
        prop_assert_eq!(sanitize_alias(&field), sanitize_alias(&field));
    }

    #[test]
    fn prop_filter_literals_are_bound(blob in column_name(), key in nested_key(), literal in "zz#[a-z' ;-]{0,12}") {
        let request = QueryRequest {
            select: vec![FieldSpec::from("id")],
            filter: vec![FieldSpec::compare(format!("{blob}.{key}"), "!=", literal.as_str())],
            ..QueryRequest::default()
        };
        let compiled = Planner::default()
            .plan(&request, &FunctionRegistry::new())
            .expect("plan");
        prop_assert!(!compiled.sql.contains("zz#"));
        prop_assert_eq!(compiled.params, vec![Value::from(literal)]);
        prop_assert!(compiled.sql.contains("IS NOT CAST(? AS TEXT)"));
    }
}
