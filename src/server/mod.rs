//! Command dispatcher
//!
//! The remote end of the transport. Reads exactly one request line, runs it
//! against a backend opened for the calling user and writes exactly one
//! response line. Every failure becomes a response: read errors are 401,
//! write errors 402 and everything else 400.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::backend::{
    AuthToken, Backend, BackendError, BackendResult, Credentials, FindQuery, KeyValuePairs,
    OpenGuard, Projection, Record, SortKey,
};
use crate::query::Filter;
use crate::remote::{Operation, Reply, Request, Response, ResponseCode};

/// Builds a backend for `(database, user)`
pub type Opener<'a> = Box<dyn FnMut(Option<&str>, &str) -> BackendResult<Box<dyn Backend>> + 'a>;

pub struct Dispatcher<'a> {
    user: String,
    opener: Opener<'a>,
}

fn argument<T: DeserializeOwned>(request: &Request, name: &str) -> BackendResult<T> {
    request
        .argument(name)
        .map_err(|e| BackendError::operation(e.to_string()))
}

/// Run a decoded request against an open backend
pub fn execute(
    backend: &mut dyn Backend,
    token: &AuthToken,
    request: &Request,
) -> BackendResult<Reply> {
    let reply = match request.operation() {
        Operation::List => {
            let names = backend.list(token)?;
            Reply::List(names.into_iter().map(Into::into).collect())
        }
        Operation::Insert => {
            let records: Vec<Record> = argument(request, "records")?;
            let kvp: KeyValuePairs = argument(request, "kvp")?;
            Reply::Result(backend.insert(token, records, &kvp)?.into())
        }
        Operation::Update => {
            let records: Vec<Record> = argument(request, "records")?;
            let upsert: bool = argument(request, "upsert")?;
            let replace: bool = argument(request, "replace")?;
            Reply::Result(backend.update(token, records, upsert, replace)?.into())
        }
        Operation::Remove => {
            let filter: Filter = argument(request, "filter")?;
            let just_one: bool = argument(request, "just_one")?;
            Reply::Result(backend.remove(token, &filter, just_one)?.into())
        }
        Operation::Find => {
            let query = FindQuery {
                filter: argument(request, "filter")?,
                sort: argument::<Vec<SortKey>>(request, "sort")?,
                limit: argument(request, "limit")?,
                projection: argument::<Projection>(request, "projection")?,
            };
            Reply::Records(backend.find(token, &query)?.collect())
        }
        Operation::AddKeys => {
            let filter: Filter = argument(request, "filter")?;
            let kvp: KeyValuePairs = argument(request, "kvp")?;
            Reply::Result(backend.add_keys(token, &filter, &kvp)?.into())
        }
        Operation::RemoveKeys => {
            let filter: Filter = argument(request, "filter")?;
            let keys: Vec<String> = argument(request, "keys")?;
            Reply::Result(backend.remove_keys(token, &filter, &keys)?.into())
        }
    };
    Ok(reply)
}

impl<'a> Dispatcher<'a> {
    pub fn new<F>(user: impl Into<String>, opener: F) -> Self
    where
        F: FnMut(Option<&str>, &str) -> BackendResult<Box<dyn Backend>> + 'a,
    {
        Self {
            user: user.into(),
            opener: Box::new(opener),
        }
    }

    /// Handle one request line; never fails, errors become responses
    pub fn dispatch_line(&mut self, line: &str) -> Response {
        match self.try_dispatch(line) {
            Ok(reply) => Response::from_reply(&reply),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "request failed");
                Response::from_error(&e)
            }
        }
    }

    fn try_dispatch(&mut self, line: &str) -> BackendResult<Reply> {
        let request = Request::decode(line).map_err(|e| BackendError::operation(e.to_string()))?;
        info!(
            user = %self.user,
            operation = %request.operation(),
            database = ?request.database(),
            "dispatching request"
        );

        let mut backend = (self.opener)(request.database(), &self.user)?;
        let mut guard = OpenGuard::new(backend.as_mut())?;
        let token = guard.authenticate(&Credentials::new(Some(self.user.clone())))?;
        let reply = execute(&mut *guard, &token, &request)?;

        info!(operation = %request.operation(), "request finished");
        Ok(reply)
    }

    /// Read all of `input`, answer it and write one response line.
    ///
    /// Input must hold exactly one line.
    pub fn serve<R: Read, W: Write>(&mut self, mut input: R, output: &mut W) -> io::Result<Response> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;

        let response = match String::from_utf8(raw) {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                match lines.as_slice() {
                    [] => Response::error(ResponseCode::OperationError, "No stdin received"),
                    [line] => self.dispatch_line(line),
                    _ => Response::error(
                        ResponseCode::OperationError,
                        "Multiple lines in stdin detected",
                    ),
                }
            }
            Err(_) => {
                warn!("request is not valid UTF-8");
                Response::error(ResponseCode::OperationError, "Invalid UTF-8 in stdin")
            }
        };

        output.write_all(response.encode().as_bytes())?;
        output.flush()?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::query::compile;
    use serde_json::json;

    fn dispatcher(shared: &MemoryBackend) -> Dispatcher<'static> {
        let shared = shared.clone();
        Dispatcher::new("alice", move |database: Option<&str>, _user: &str| {
            let backend = match database {
                Some(name) => shared.with_database(name),
                None => shared.clone(),
            };
            Ok(Box::new(backend) as Box<dyn Backend>)
        })
    }

    fn serve(d: &mut Dispatcher<'_>, input: &str) -> (Response, String) {
        let mut out = Vec::new();
        let response = d.serve(input.as_bytes(), &mut out).unwrap();
        (response, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_no_stdin() {
        let mut d = dispatcher(&MemoryBackend::new());
        let (response, out) = serve(&mut d, "");
        assert_eq!(response.code(), ResponseCode::OperationError);
        assert_eq!(response.payload(), b"No stdin received");
        assert!(out.starts_with("400:") && out.ends_with('\n'));
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_invalid_utf8_still_answers() {
        let mut d = dispatcher(&MemoryBackend::new());
        let mut out = Vec::new();
        let response = d.serve(&b"list \xff\n"[..], &mut out).unwrap();
        assert_eq!(response.code(), ResponseCode::OperationError);
        assert_eq!(response.payload(), b"Invalid UTF-8 in stdin");

        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("400:") && line.ends_with('\n'));
        assert_eq!(line.lines().count(), 1);
    }

    #[test]
    fn test_multiple_lines() {
        let mut d = dispatcher(&MemoryBackend::new());
        let (response, _) = serve(&mut d, "list bnVsbA==\nlist bnVsbA==\n");
        assert_eq!(response.payload(), b"Multiple lines in stdin detected");
    }

    #[test]
    fn test_garbage_is_400() {
        let mut d = dispatcher(&MemoryBackend::new());
        let (response, _) = serve(&mut d, "drop everything\n");
        assert_eq!(response.code(), ResponseCode::OperationError);
    }

    #[test]
    fn test_insert_then_find() {
        let shared = MemoryBackend::new();
        let mut d = dispatcher(&shared);

        let insert = Request::new(Operation::Insert, Some("db".into()))
            .with("records", &json!([{"uid": "a", "energy": 0.5}, {"uid": "b", "energy": 0.7}]))
            .unwrap()
            .with("kvp", &json!({}))
            .unwrap();
        let (response, _) = serve(&mut d, &insert.encode().unwrap());
        assert_eq!(response.code(), ResponseCode::Inserted);

        let find = Request::new(Operation::Find, Some("db".into()))
            .with("filter", &compile(&["energy<0.6"]).unwrap())
            .unwrap()
            .with("sort", &Vec::<SortKey>::new())
            .unwrap()
            .with("limit", &0)
            .unwrap()
            .with("projection", &Projection::All)
            .unwrap();
        let (response, _) = serve(&mut d, &find.encode().unwrap());
        match response.into_reply().unwrap() {
            Reply::Records(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["uid"], "a");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_readonly_write_is_402() {
        let mut shared = MemoryBackend::new();
        shared.set_readonly(true);
        let mut d = dispatcher(&shared);

        let request = Request::new(Operation::AddKeys, Some("db".into()))
            .with("filter", &Filter::new())
            .unwrap()
            .with("kvp", &json!({"a": 1}))
            .unwrap();
        let line = d.dispatch_line(&request.encode().unwrap()).encode();
        assert!(line.starts_with("402:"));
        let err = Response::parse(&line, "", Some(0)).unwrap().into_reply().unwrap_err();
        assert_eq!(err, BackendError::write("No write access"));
    }

    #[test]
    fn test_missing_database_is_401() {
        let mut d = dispatcher(&MemoryBackend::new());
        let request = Request::new(Operation::Remove, None)
            .with("filter", &Filter::new())
            .unwrap()
            .with("just_one", &false)
            .unwrap();
        let response = d.dispatch_line(&request.encode().unwrap());
        assert_eq!(response.code(), ResponseCode::ReadError);
    }

    #[test]
    fn test_translation_error_is_400() {
        let mut d = dispatcher(&MemoryBackend::new());
        let filter = json!([{"key": "energy", "operator": "~", "operand": {"link": "or", "items": ["C"]}}]);
        let request = Request::new(Operation::Remove, Some("db".into()))
            .with("filter", &filter)
            .unwrap()
            .with("just_one", &false)
            .unwrap();
        let response = d.dispatch_line(&request.encode().unwrap());
        assert_eq!(response.code(), ResponseCode::OperationError);
        assert!(String::from_utf8_lossy(response.payload()).contains("energy"));
    }
}
