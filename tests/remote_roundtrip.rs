//! Remote transport tests
//!
//! A loopback transport hands each request line straight to an in-process
//! dispatcher over a shared memory store, so the whole client → wire →
//! dispatcher → wire → client path runs without ssh.

use abcd::backend::{
    AuthToken, Backend, BackendError, Credentials, FindQuery, KeyValuePairs, MemoryBackend,
    OpenGuard, Projection, Record, SortKey,
};
use abcd::query::{compile, Filter};
use abcd::remote::{
    CommunicationError, Output, RemoteBackend, Request, Operation, Response, ResponseCode,
    Transport,
};
use abcd::server::Dispatcher;
use serde_json::{json, Value};
use std::cell::RefCell;

// =============================================================================
// Test Utilities
// =============================================================================

struct Loopback {
    shared: MemoryBackend,
    lines: RefCell<Vec<String>>,
}

impl Loopback {
    fn new(shared: &MemoryBackend) -> Self {
        Self {
            shared: shared.clone(),
            lines: RefCell::new(Vec::new()),
        }
    }
}

impl Transport for Loopback {
    fn call(&self, line: &str) -> Result<Output, CommunicationError> {
        self.lines.borrow_mut().push(line.to_string());
        let shared = self.shared.clone();
        let mut dispatcher = Dispatcher::new("alice", move |database: Option<&str>, _user: &str| {
            let backend = match database {
                Some(name) => shared.with_database(name),
                None => shared.clone(),
            };
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        let mut stdout = Vec::new();
        dispatcher
            .serve(line.as_bytes(), &mut stdout)
            .map_err(|e| CommunicationError::Io(e.to_string()))?;
        Ok(Output {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::new(),
            status: Some(0),
        })
    }
}

/// Replies with fixed stdout whatever the request
struct Canned(&'static str);

impl Transport for Canned {
    fn call(&self, _line: &str) -> Result<Output, CommunicationError> {
        Ok(Output {
            stdout: self.0.to_string(),
            stderr: "remote diagnostics".to_string(),
            status: Some(0),
        })
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

fn seeded(database: &str, rows: Vec<Value>) -> MemoryBackend {
    let shared = MemoryBackend::new();
    let mut local = shared.with_database(database);
    local.open().unwrap();
    let token = local.authenticate(&Credentials::default()).unwrap();
    local
        .insert(&token, rows.into_iter().map(record).collect(), &KeyValuePairs::new())
        .unwrap();
    shared
}

fn remote<T: Transport>(transport: T, database: &str) -> (RemoteBackend<T>, AuthToken) {
    let mut backend = RemoteBackend::new(transport, Some(database.to_string()));
    backend.open().unwrap();
    let token = backend.authenticate(&Credentials::default()).unwrap();
    (backend, token)
}

fn uids(backend: &mut dyn Backend, token: &AuthToken, tokens: &[&str]) -> Vec<String> {
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

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_range_filter_over_the_wire() {
    let shared = seeded(
        "db",
        vec![
            json!({"uid": "a", "energy": 0.5}),
            json!({"uid": "b", "energy": 0.7}),
            json!({"uid": "c", "energy": 0.2}),
        ],
    );
    let (mut backend, token) = remote(Loopback::new(&shared), "db");
    assert_eq!(uids(&mut backend, &token, &["energy<0.6"]), vec!["a", "c"]);

    let lines = backend.transport().lines.borrow();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("find "));
    assert!(lines[0].ends_with('\n'));
}

#[test]
fn test_not_equal_excludes_every_value() {
    let rows = (9..=13).map(|id| json!({"uid": format!("r{}", id), "id": id})).collect();
    let shared = seeded("db", rows);
    let (mut backend, token) = remote(Loopback::new(&shared), "db");
    assert_eq!(uids(&mut backend, &token, &["id!=10,11,12"]), vec!["r13", "r9"]);
}

#[test]
fn test_two_or_conditions_over_the_wire() {
    let mut rows = Vec::new();
    for a in 1..=3 {
        for b in 3..=5 {
            rows.push(json!({"uid": format!("{}{}", a, b), "a": a, "b": b}));
        }
    }
    let shared = seeded("db", rows);
    let (mut backend, token) = remote(Loopback::new(&shared), "db");
    assert_eq!(
        uids(&mut backend, &token, &["a=1,2", "b=3,4"]),
        vec!["13", "14", "23", "24"]
    );
}

#[test]
fn test_empty_record_list_is_empty_cursor() {
    // base64("[]")
    let (mut backend, token) = remote(Canned("204:W10=\n"), "db");
    let cursor = backend.find(&token, &FindQuery::default()).unwrap();
    assert_eq!(cursor.count(), 0);
}

#[test]
fn test_readonly_write_keeps_error_text() {
    let mut shared = seeded("db", vec![json!({"uid": "a"})]);
    shared.set_readonly(true);
    let (mut backend, token) = remote(Loopback::new(&shared), "db");

    let mut kvp = KeyValuePairs::new();
    kvp.insert("tag".into(), json!("x"));
    let err = backend.add_keys(&token, &Filter::new(), &kvp).unwrap_err();
    assert_eq!(err, BackendError::write("No write access"));
    assert_eq!(err.kind(), "WriteError");
}

// =============================================================================
// Write operations through the client
// =============================================================================

#[test]
fn test_writes_round_trip_results() {
    let shared = MemoryBackend::new();
    let (mut backend, token) = remote(Loopback::new(&shared), "db");

    let rows = vec![
        record(json!({"uid": "a", "energy": 1.5})),
        record(json!({"uid": "b", "energy": -2})),
        record(json!({"uid": "a", "energy": 9})),
    ];
    let mut kvp = KeyValuePairs::new();
    kvp.insert("project".into(), json!("x"));
    let inserted = backend.insert(&token, rows, &kvp).unwrap();
    assert_eq!(inserted.inserted_ids, vec!["a", "b"]);
    assert_eq!(inserted.skipped_ids, vec!["a"]);

    let updated = backend
        .update(&token, vec![record(json!({"uid": "z", "energy": 0}))], true, false)
        .unwrap();
    assert_eq!(updated.upserted_ids, vec!["z"]);

    let removed_keys = backend
        .remove_keys(&token, &compile(&["energy<0"]).unwrap(), &["project".to_string()])
        .unwrap();
    assert_eq!(removed_keys.modified_ids, vec!["b"]);
    assert_eq!(removed_keys.count_removed, 1);

    let removed = backend.remove(&token, &Filter::new(), true).unwrap();
    assert_eq!(removed.removed_count, 1);

    let rest: Vec<Record> = shared.records("db").unwrap();
    assert_eq!(rest.len(), 2);
}

#[test]
fn test_projection_and_limit_travel() {
    let shared = seeded(
        "db",
        vec![
            json!({"uid": "a", "energy": 3, "tag": "x"}),
            json!({"uid": "b", "energy": 1, "tag": "y"}),
            json!({"uid": "c", "energy": 2, "tag": "z"}),
        ],
    );
    let (mut backend, token) = remote(Loopback::new(&shared), "db");
    let query = FindQuery {
        filter: Filter::new(),
        sort: vec![SortKey::descending("energy")],
        limit: 2,
        projection: Projection::Exclude(vec!["tag".into()]),
    };
    let rows: Vec<Record> = backend.find(&token, &query).unwrap().collect();
    assert_eq!(rows, vec![record(json!({"uid": "a", "energy": 3})), record(json!({"uid": "c", "energy": 2}))]);
}

#[test]
fn test_list_over_the_wire() {
    let shared = seeded("alpha", vec![json!({"uid": "a"})]);
    let mut backend = RemoteBackend::new(Loopback::new(&shared), None);
    let token = backend.authenticate(&Credentials::default()).unwrap();
    assert_eq!(backend.list(&token).unwrap(), vec!["alpha"]);
}

#[test]
fn test_open_guard_closes_remote_backend() {
    let shared = MemoryBackend::new();
    let mut backend = RemoteBackend::new(Loopback::new(&shared), Some("db".into()));
    {
        let guard = OpenGuard::new(&mut backend).unwrap();
        assert!(guard.is_open());
    }
    assert!(!backend.is_open());
}

// =============================================================================
// Malformed peer output
// =============================================================================

#[test]
fn test_unframed_output_is_communication_error() {
    for stdout in ["", "ok", "Permission denied (publickey).\n", "20:abc\n", "2x1:abc\n"] {
        let (mut backend, token) = remote(Canned(stdout), "db");
        match backend.find(&token, &FindQuery::default()) {
            Err(BackendError::Communication(CommunicationError::BadHeader { stderr, .. })) => {
                assert_eq!(stderr, "remote diagnostics")
            }
            other => panic!("expected bad header for {:?}, got {:?}", stdout, other.map(|c| c.count())),
        }
    }
}

#[test]
fn test_unknown_code_and_bad_payload() {
    let (mut backend, token) = remote(Canned("299:W10=\n"), "db");
    let err = backend.find(&token, &FindQuery::default()).unwrap_err();
    assert!(matches!(
        err,
        BackendError::Communication(CommunicationError::UnknownCode { .. })
    ));

    let (mut backend, token) = remote(Canned("204:%%%\n"), "db");
    let err = backend.find(&token, &FindQuery::default()).unwrap_err();
    assert_eq!(err.kind(), "CommunicationError");
}

#[test]
fn test_reply_shape_mismatch() {
    // base64("hi") as a text reply to find
    let (mut backend, token) = remote(Canned("201:aGk=\n"), "db");
    let err = backend.find(&token, &FindQuery::default()).unwrap_err();
    assert!(matches!(
        err,
        BackendError::Communication(CommunicationError::UnexpectedReply(_))
    ));
}

// =============================================================================
// Request codec
// =============================================================================

#[test]
fn test_request_values_survive_encoding() {
    let values = [json!(7), json!(-0.125), json!("Ti O2"), json!([1, "a", 2.5]), json!({"k": {"n": null}})];
    for value in values {
        let request = Request::new(Operation::Insert, Some("db".into()))
            .with("records", &value)
            .unwrap()
            .with("kvp", &json!({}))
            .unwrap();
        let line = request.encode().unwrap();
        assert!(line.trim_end().chars().all(|c| c.is_ascii_alphanumeric() || "+/=_- ".contains(c)));

        let decoded = Request::decode(&line).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.arguments()["records"], value);
    }
}

#[test]
fn test_error_codes_map_back() {
    for (code, kind) in [
        (ResponseCode::OperationError, "OperationError"),
        (ResponseCode::ReadError, "ReadError"),
        (ResponseCode::WriteError, "WriteError"),
    ] {
        let line = Response::error(code, "went wrong").encode();
        let err = Response::parse(&line, "", Some(0)).unwrap().into_reply().unwrap_err();
        assert_eq!(err.kind(), kind);
        assert_eq!(err.to_string(), "went wrong");
    }
}
