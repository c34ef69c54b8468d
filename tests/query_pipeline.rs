//! Query pipeline tests
//!
//! Compiler output feeding the translator and the native-OR memory store.

use abcd::backend::{
    AuthToken, Backend, Credentials, FindQuery, KeyValuePairs, MemoryBackend, Record, SortKey,
};
use abcd::query::{compile, Filter};
use abcd::remote::{Operation, Request, ResponseCode};
use abcd::server::Dispatcher;
use abcd::translate::translate;
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

fn store() -> (MemoryBackend, AuthToken) {
    let mut backend = MemoryBackend::new().with_database("db");
    backend.open().unwrap();
    let token = backend.authenticate(&Credentials::default()).unwrap();
    let rows = vec![
        json!({"uid": "h2", "id": 1, "elements": ["H"], "energy": -0.5}),
        json!({"uid": "ch4", "id": 2, "elements": ["C", "H"], "energy": 0.25}),
        json!({"uid": "co2", "id": 3, "elements": ["C", "O"], "energy": 1}),
        json!({"uid": "tio2", "id": 4, "elements": ["O", "Ti"], "energy": 2.5}),
        json!({"uid": "bare", "id": "x"}),
    ];
    backend
        .insert(&token, rows.into_iter().map(record).collect(), &KeyValuePairs::new())
        .unwrap();
    (backend, token)
}

fn select(backend: &mut MemoryBackend, token: &AuthToken, tokens: &[&str]) -> BTreeSet<String> {
    let query = FindQuery {
        sort: vec![SortKey::ascending("uid")],
        ..FindQuery::new(compile(tokens).unwrap())
    };
    backend
        .find(token, &query)
        .unwrap()
        .map(|r| r["uid"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_multi_value_equals_union_of_single_values() {
    let (mut backend, token) = store();
    let cases = [
        ("id", vec!["1", "3", "4"], "="),
        ("elements", vec!["C", "Ti", "Xe"], "~"),
    ];
    for (key, values, op) in cases {
        let joined = format!("{}{}{}", key, op, values.join(","));
        let together = select(&mut backend, &token, &[joined.as_str()]);

        let mut union = BTreeSet::new();
        for value in &values {
            let single = format!("{}{}{}", key, op, value);
            union.extend(select(&mut backend, &token, &[single.as_str()]));
        }
        assert_eq!(together, union, "{}", joined);
    }
}

#[test]
fn test_not_equal_is_intersection_of_exclusions() {
    let (mut backend, token) = store();
    let together = select(&mut backend, &token, &["id!=1,2,3"]);

    let mut intersection: Option<BTreeSet<String>> = None;
    for value in ["1", "2", "3"] {
        let single = select(&mut backend, &token, &[format!("id!={}", value).as_str()]);
        intersection = Some(match intersection {
            None => single,
            Some(acc) => acc.intersection(&single).cloned().collect(),
        });
    }
    assert_eq!(Some(together.clone()), intersection);
    assert!(together.contains("tio2"));
}

#[test]
fn test_missing_field_never_matches() {
    let (mut backend, token) = store();
    assert!(!select(&mut backend, &token, &["energy!=1"]).contains("bare"));
    assert!(!select(&mut backend, &token, &["elements~H"]).contains("bare"));
}

#[test]
fn test_sub_query_count_is_product_of_operand_counts() {
    for (tokens, expected) in [
        (vec!["a=1,2", "b=3,4"], 4),
        (vec!["a=1,2,3", "b=3,4", "c<9"], 6),
        (vec!["a!=1,2,3", "b=3,4"], 2),
        (vec!["elements~C,H,O"], 3),
    ] {
        let filter = compile(&tokens).unwrap();
        assert_eq!(translate(&filter).unwrap().len(), expected, "{:?}", tokens);
    }
}

#[test]
fn test_sub_query_display() {
    let filter = compile(&["a=1,2 b=3"]).unwrap();
    let rendered: Vec<String> = translate(&filter)
        .unwrap()
        .iter()
        .map(|q| q.to_string())
        .collect();
    assert_eq!(rendered, vec!["a=1,b=3", "a=2,b=3"]);
}

#[test]
fn test_invalid_condition_on_the_wire_is_rejected() {
    // a range operator with two operands never leaves a local compile,
    // but a peer must still refuse it
    let filter = json!([{"key": "energy", "operator": "<", "operand": {"link": "or", "items": [1, 2]}}]);
    let request = Request::new(Operation::Remove, Some("db".into()))
        .with("filter", &filter)
        .unwrap()
        .with("just_one", &false)
        .unwrap();

    let (shared, _) = store();
    let mut dispatcher = Dispatcher::new("alice", move |_db: Option<&str>, _user: &str| {
        Ok(Box::new(shared.clone()) as Box<dyn Backend>)
    });
    let response = dispatcher.dispatch_line(&request.encode().unwrap());
    assert_eq!(response.code(), ResponseCode::OperationError);
    assert!(serde_json::from_value::<Filter>(filter).is_err());
}
