//! Wire codec for one request line and one response line
//!
//! ```text
//! request:  <operation> <b64(json(database))> [<name>=<b64(json(value))>]*\n
//! response: <code>:<b64(payload)>\n
//! ```
//!
//! Base64 uses the standard alphabet with padding, so neither line ever
//! contains a newline or more than one consecutive space.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::backend::{
    AddKeysResult, BackendError, BackendResult, InsertResult, OpResult, Record, RemoveKeysResult,
    RemoveResult, UpdateResult,
};

use super::errors::{CommunicationError, ProtocolError};

/// Operations a request can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Insert,
    Update,
    Remove,
    Find,
    AddKeys,
    RemoveKeys,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::List,
        Operation::Insert,
        Operation::Update,
        Operation::Remove,
        Operation::Find,
        Operation::AddKeys,
        Operation::RemoveKeys,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Remove => "remove",
            Operation::Find => "find",
            Operation::AddKeys => "add-keys",
            Operation::RemoveKeys => "remove-keys",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| ProtocolError::UnknownOperation(name.to_string()))
    }

    /// Argument names, in wire order. Every one is required.
    pub fn arguments(&self) -> &'static [&'static str] {
        match self {
            Operation::List => &[],
            Operation::Insert => &["records", "kvp"],
            Operation::Update => &["records", "upsert", "replace"],
            Operation::Remove => &["filter", "just_one"],
            Operation::Find => &["filter", "sort", "limit", "projection"],
            Operation::AddKeys => &["filter", "kvp"],
            Operation::RemoveKeys => &["filter", "keys"],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn encode_json<T: Serialize + ?Sized>(field: &str, value: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_vec(value).map_err(|e| ProtocolError::Json {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(STANDARD.encode(json))
}

fn decode_json(field: &str, encoded: &str) -> Result<Value, ProtocolError> {
    let bytes = STANDARD.decode(encoded).map_err(|e| ProtocolError::Base64 {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::Json {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// One operation addressed to one database
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    operation: Operation,
    database: Option<String>,
    arguments: BTreeMap<String, Value>,
}

impl Request {
    pub fn new(operation: Operation, database: Option<String>) -> Self {
        Self {
            operation,
            database,
            arguments: BTreeMap::new(),
        }
    }

    /// Attach an argument; the name must belong to the operation.
    pub fn with<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self, ProtocolError> {
        if !self.operation.arguments().contains(&name) {
            return Err(ProtocolError::UnknownArgument {
                operation: self.operation.to_string(),
                argument: name.to_string(),
            });
        }
        let value = serde_json::to_value(value).map_err(|e| ProtocolError::Json {
            field: name.to_string(),
            reason: e.to_string(),
        })?;
        self.arguments.insert(name.to_string(), value);
        Ok(self)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn arguments(&self) -> &BTreeMap<String, Value> {
        &self.arguments
    }

    /// Read a typed argument
    pub fn argument<T: DeserializeOwned>(&self, name: &str) -> Result<T, ProtocolError> {
        let value = self
            .arguments
            .get(name)
            .ok_or_else(|| ProtocolError::MissingArgument {
                operation: self.operation.to_string(),
                argument: name.to_string(),
            })?;
        T::deserialize(value).map_err(|e| ProtocolError::Value {
            field: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode as a single newline-terminated line
    pub fn encode(&self) -> Result<String, ProtocolError> {
        for name in self.operation.arguments() {
            if !self.arguments.contains_key(*name) {
                return Err(ProtocolError::MissingArgument {
                    operation: self.operation.to_string(),
                    argument: name.to_string(),
                });
            }
        }

        let mut line = format!(
            "{} {}",
            self.operation,
            encode_json("database", &self.database)?
        );
        for name in self.operation.arguments() {
            if let Some(value) = self.arguments.get(*name) {
                line.push(' ');
                line.push_str(name);
                line.push('=');
                line.push_str(&encode_json(name, value)?);
            }
        }
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        let mut parts = line.split(' ');

        let operation = match parts.next() {
            Some("") | None => return Err(ProtocolError::Empty),
            Some(name) => Operation::parse(name)?,
        };

        let database = match parts.next() {
            Some(encoded) => {
                let value = decode_json("database", encoded)?;
                match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => {
                        return Err(ProtocolError::Value {
                            field: "database".into(),
                            reason: format!("expected string or null, got {}", other),
                        })
                    }
                }
            }
            None => {
                return Err(ProtocolError::MissingArgument {
                    operation: operation.to_string(),
                    argument: "database".into(),
                })
            }
        };

        let mut arguments = BTreeMap::new();
        for part in parts {
            let (name, encoded) = part
                .split_once('=')
                .ok_or_else(|| ProtocolError::MalformedArgument(part.to_string()))?;
            if !operation.arguments().contains(&name) {
                return Err(ProtocolError::UnknownArgument {
                    operation: operation.to_string(),
                    argument: name.to_string(),
                });
            }
            if arguments.contains_key(name) {
                return Err(ProtocolError::DuplicateArgument(name.to_string()));
            }
            arguments.insert(name.to_string(), decode_json(name, encoded)?);
        }

        for name in operation.arguments() {
            if !arguments.contains_key(*name) {
                return Err(ProtocolError::MissingArgument {
                    operation: operation.to_string(),
                    argument: name.to_string(),
                });
            }
        }

        Ok(Self {
            operation,
            database,
            arguments,
        })
    }
}

/// Response codes and the payload shape each one announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Text,
    List,
    Dict,
    Records,
    Inserted,
    Updated,
    Removed,
    KeysAdded,
    KeysRemoved,
    OperationError,
    ReadError,
    WriteError,
}

impl ResponseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            ResponseCode::Text => 201,
            ResponseCode::List => 202,
            ResponseCode::Dict => 203,
            ResponseCode::Records => 204,
            ResponseCode::Inserted => 220,
            ResponseCode::Updated => 221,
            ResponseCode::Removed => 222,
            ResponseCode::KeysAdded => 223,
            ResponseCode::KeysRemoved => 224,
            ResponseCode::OperationError => 400,
            ResponseCode::ReadError => 401,
            ResponseCode::WriteError => 402,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        let code = match code {
            201 => ResponseCode::Text,
            202 => ResponseCode::List,
            203 => ResponseCode::Dict,
            204 => ResponseCode::Records,
            220 => ResponseCode::Inserted,
            221 => ResponseCode::Updated,
            222 => ResponseCode::Removed,
            223 => ResponseCode::KeysAdded,
            224 => ResponseCode::KeysRemoved,
            400 => ResponseCode::OperationError,
            401 => ResponseCode::ReadError,
            402 => ResponseCode::WriteError,
            _ => return None,
        };
        Some(code)
    }

    pub fn is_error(&self) -> bool {
        self.as_u16() >= 400
    }
}

/// A decoded response payload
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    List(Vec<Value>),
    Dict(Map<String, Value>),
    Records(Vec<Record>),
    Result(OpResult),
}

/// A response code plus its raw (already base64-decoded) payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: ResponseCode,
    payload: Vec<u8>,
}

impl Response {
    pub fn new(code: ResponseCode, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }

    pub fn text(text: &str) -> Self {
        Self::new(ResponseCode::Text, text.as_bytes().to_vec())
    }

    pub fn error(code: ResponseCode, message: &str) -> Self {
        Self::new(code, message.as_bytes().to_vec())
    }

    /// Build the response for a successful operation
    pub fn from_reply(reply: &Reply) -> Self {
        let encoded = match reply {
            Reply::Text(text) => return Self::text(text),
            Reply::List(items) => serde_json::to_vec(items).map(|p| (ResponseCode::List, p)),
            Reply::Dict(map) => serde_json::to_vec(map).map(|p| (ResponseCode::Dict, p)),
            Reply::Records(rows) => serde_json::to_vec(rows).map(|p| (ResponseCode::Records, p)),
            Reply::Result(result) => match result {
                OpResult::Insert(r) => serde_json::to_vec(r).map(|p| (ResponseCode::Inserted, p)),
                OpResult::Update(r) => serde_json::to_vec(r).map(|p| (ResponseCode::Updated, p)),
                OpResult::Remove(r) => serde_json::to_vec(r).map(|p| (ResponseCode::Removed, p)),
                OpResult::AddKeys(r) => serde_json::to_vec(r).map(|p| (ResponseCode::KeysAdded, p)),
                OpResult::RemoveKeys(r) => {
                    serde_json::to_vec(r).map(|p| (ResponseCode::KeysRemoved, p))
                }
            },
        };
        match encoded {
            Ok((code, payload)) => Self::new(code, payload),
            Err(e) => Self::error(
                ResponseCode::OperationError,
                &format!("Failed to encode response: {}", e),
            ),
        }
    }

    /// Map a failure to 401 (read), 402 (write) or 400 (anything else)
    pub fn from_error(err: &BackendError) -> Self {
        let code = match err {
            BackendError::Read(_) => ResponseCode::ReadError,
            BackendError::Write(_) => ResponseCode::WriteError,
            _ => ResponseCode::OperationError,
        };
        Self::error(code, &err.to_string())
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encode as a single newline-terminated line
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.code.as_u16(), STANDARD.encode(&self.payload))
    }

    /// Parse a peer's stdout. `stderr` and `status` only feed diagnostics.
    pub fn parse(stdout: &str, stderr: &str, status: Option<i32>) -> Result<Self, CommunicationError> {
        let bytes = stdout.as_bytes();
        let framed = bytes.len() >= 4
            && bytes[3] == b':'
            && bytes[..3].iter().all(u8::is_ascii_digit);
        if !framed {
            return Err(CommunicationError::BadHeader {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                status,
            });
        }

        let digits = &stdout[..3];
        let code = digits
            .parse::<u16>()
            .ok()
            .and_then(ResponseCode::from_u16)
            .ok_or_else(|| CommunicationError::UnknownCode {
                code: digits.to_string(),
                stderr: stderr.to_string(),
            })?;

        let encoded = stdout[4..].trim_end();
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| CommunicationError::BadPayload {
                code: code.as_u16(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(code, payload))
    }

    /// Consume the response: payloads become a [`Reply`], error codes
    /// become the matching [`BackendError`].
    pub fn into_reply(self) -> BackendResult<Reply> {
        let code = self.code;
        let bad_payload = |reason: String| {
            BackendError::from(CommunicationError::BadPayload {
                code: code.as_u16(),
                reason,
            })
        };

        if code == ResponseCode::Text || code.is_error() {
            let text = String::from_utf8(self.payload).map_err(|e| bad_payload(e.to_string()))?;
            return match code {
                ResponseCode::OperationError => Err(BackendError::Operation(text)),
                ResponseCode::ReadError => Err(BackendError::Read(text)),
                ResponseCode::WriteError => Err(BackendError::Write(text)),
                _ => Ok(Reply::Text(text)),
            };
        }

        fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, String> {
            serde_json::from_slice(payload).map_err(|e| e.to_string())
        }

        let payload = &self.payload;
        let reply = match code {
            ResponseCode::List => parse(payload).map(Reply::List),
            ResponseCode::Dict => parse(payload).map(Reply::Dict),
            ResponseCode::Records => parse(payload).map(Reply::Records),
            ResponseCode::Inserted => parse::<InsertResult>(payload).map(|r| Reply::Result(r.into())),
            ResponseCode::Updated => parse::<UpdateResult>(payload).map(|r| Reply::Result(r.into())),
            ResponseCode::Removed => parse::<RemoveResult>(payload).map(|r| Reply::Result(r.into())),
            ResponseCode::KeysAdded => {
                parse::<AddKeysResult>(payload).map(|r| Reply::Result(r.into()))
            }
            ResponseCode::KeysRemoved => {
                parse::<RemoveKeysResult>(payload).map(|r| Reply::Result(r.into()))
            }
            ResponseCode::Text
            | ResponseCode::OperationError
            | ResponseCode::ReadError
            | ResponseCode::WriteError => Err(format!("unexpected code {}", code.as_u16())),
        };
        reply.map_err(bad_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;
    use serde_json::json;

    #[test]
    fn test_request_line_alphabet() {
        let request = Request::new(Operation::Find, Some("my db".into()))
            .with("filter", &compile(&["energy<0.6"]).unwrap())
            .unwrap()
            .with("sort", &json!([]))
            .unwrap()
            .with("limit", &0)
            .unwrap()
            .with("projection", &json!({"mode": "all"}))
            .unwrap();
        let line = request.encode().unwrap();
        assert!(line.ends_with('\n'));
        let body = line.trim_end_matches('\n');
        assert!(body.starts_with("find "));
        assert!(!body.contains("  "));
        assert!(body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+/=_- ".contains(c)));
    }

    #[test]
    fn test_request_round_trip_values() {
        let request = Request::new(Operation::Insert, Some("db".into()))
            .with("records", &json!([{"uid": "a", "n": 1, "x": 0.1, "s": "é", "l": [1, 2.5], "d": {"k": null}}]))
            .unwrap()
            .with("kvp", &json!({"big": i64::MAX, "neg": -3, "f": 1e-12}))
            .unwrap();
        let decoded = Request::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.operation(), Operation::Insert);
        assert_eq!(decoded.database(), Some("db"));
    }

    #[test]
    fn test_request_null_database() {
        let line = Request::new(Operation::List, None).encode().unwrap();
        assert_eq!(line, format!("list {}\n", STANDARD.encode("null")));
        assert_eq!(Request::decode(&line).unwrap().database(), None);
    }

    #[test]
    fn test_request_rejects_bad_lines() {
        let db = STANDARD.encode("\"db\"");
        let t = STANDARD.encode("true");

        assert_eq!(Request::decode(""), Err(ProtocolError::Empty));
        assert!(matches!(
            Request::decode(&format!("drop {}", db)),
            Err(ProtocolError::UnknownOperation(_))
        ));
        assert!(matches!(
            Request::decode("list"),
            Err(ProtocolError::MissingArgument { .. })
        ));
        assert!(matches!(
            Request::decode(&format!("remove {} just_one={}", db, t)),
            Err(ProtocolError::MissingArgument { .. })
        ));
        assert!(matches!(
            Request::decode(&format!("list {} extra={}", db, t)),
            Err(ProtocolError::UnknownArgument { .. })
        ));
        assert!(matches!(
            Request::decode(&format!("remove {} just_one={} just_one={}", db, t, t)),
            Err(ProtocolError::DuplicateArgument(_))
        ));
        assert!(matches!(
            Request::decode(&format!("list {}", "!!!")),
            Err(ProtocolError::Base64 { .. })
        ));
        assert!(matches!(
            Request::decode(&format!("list {}", STANDARD.encode("{"))),
            Err(ProtocolError::Json { .. })
        ));
    }

    #[test]
    fn test_invalid_filter_over_the_wire() {
        let bad = json!([{"key": "e", "operator": "<", "operand": {"link": "or", "items": [1, 2]}}]);
        let request = Request::new(Operation::Remove, Some("db".into()))
            .with("filter", &bad)
            .unwrap()
            .with("just_one", &false)
            .unwrap();
        let decoded = Request::decode(&request.encode().unwrap()).unwrap();
        let filter: Result<crate::query::Filter, _> = decoded.argument("filter");
        assert!(matches!(filter, Err(ProtocolError::Value { .. })));
    }

    #[test]
    fn test_response_codes() {
        let cases = [
            (Reply::Text("hi".into()), 201),
            (Reply::List(vec![json!("a")]), 202),
            (Reply::Dict(Map::new()), 203),
            (Reply::Records(vec![]), 204),
            (Reply::Result(InsertResult::new(vec![], vec![], 0).into()), 220),
            (Reply::Result(UpdateResult::new(vec![], vec![], vec![], vec![], 0).into()), 221),
            (Reply::Result(RemoveResult::new(0).into()), 222),
            (Reply::Result(AddKeysResult::new(vec![], 0).into()), 223),
            (Reply::Result(RemoveKeysResult::new(vec![], 0).into()), 224),
        ];
        for (reply, code) in cases {
            let line = Response::from_reply(&reply).encode();
            assert!(line.starts_with(&format!("{}:", code)));
            let back = Response::parse(&line, "", Some(0)).unwrap().into_reply().unwrap();
            assert_eq!(back, reply);
        }
    }

    #[test]
    fn test_error_codes_restore_kind() {
        for err in [
            BackendError::read("gone"),
            BackendError::write("No write access"),
            BackendError::operation("bad"),
        ] {
            let line = Response::from_error(&err).encode();
            let back = Response::parse(&line, "", Some(0)).unwrap().into_reply().unwrap_err();
            assert_eq!(back, err);
        }
        let auth = BackendError::Authentication("reserved".into());
        assert!(Response::from_error(&auth).encode().starts_with("400:"));
    }

    #[test]
    fn test_unframed_output() {
        for stdout in ["", "20", "201", "2011abc", "abc:def", "Welcome to host\n201:aGk="] {
            let err = Response::parse(stdout, "banner", Some(1)).unwrap_err();
            assert!(matches!(err, CommunicationError::BadHeader { .. }), "{}", stdout);
        }
    }

    #[test]
    fn test_unknown_code_and_bad_payload() {
        assert!(matches!(
            Response::parse("299:aGk=\n", "", Some(0)),
            Err(CommunicationError::UnknownCode { .. })
        ));
        assert!(matches!(
            Response::parse("201:***\n", "", Some(0)),
            Err(CommunicationError::BadPayload { .. })
        ));

        let not_json = format!("204:{}\n", STANDARD.encode("[{"));
        let err = Response::parse(&not_json, "", Some(0)).unwrap().into_reply().unwrap_err();
        assert_eq!(err.kind(), "CommunicationError");
    }

    #[test]
    fn test_empty_text_payload() {
        let reply = Response::parse("201:\n", "", Some(0)).unwrap().into_reply().unwrap();
        assert_eq!(reply, Reply::Text(String::new()));
    }

    #[test]
    fn test_result_accepts_missing_msg() {
        let payload = STANDARD.encode(r#"{"_removed_count": 3}"#);
        let reply = Response::parse(&format!("222:{}", payload), "", Some(0))
            .unwrap()
            .into_reply()
            .unwrap();
        match reply {
            Reply::Result(OpResult::Remove(r)) => assert_eq!(r.removed_count, 3),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
