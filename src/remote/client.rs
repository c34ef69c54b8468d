//! Backend that forwards every operation to a remote peer

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{
    AddKeysResult, AuthToken, Backend, BackendError, BackendResult, Credentials, Cursor,
    FindQuery, InsertResult, KeyValuePairs, OpResult, Record, RemoveKeysResult, RemoveResult,
    UpdateResult,
};
use crate::query::Filter;

use super::codec::{Operation, Reply, Request, Response};
use super::errors::CommunicationError;
use super::transport::{SshTransport, Transport};

/// Forwards each call as one request line over a [`Transport`]
#[derive(Debug, Clone)]
pub struct RemoteBackend<T: Transport = SshTransport> {
    transport: T,
    database: Option<String>,
    open: bool,
}

fn reply_name(reply: &Reply) -> String {
    match reply {
        Reply::Text(_) => "text".into(),
        Reply::List(_) => "list".into(),
        Reply::Dict(_) => "dict".into(),
        Reply::Records(_) => "records".into(),
        Reply::Result(r) => r.name().into(),
    }
}

fn unexpected(reply: &Reply) -> BackendError {
    CommunicationError::UnexpectedReply(reply_name(reply)).into()
}

impl<T: Transport> RemoteBackend<T> {
    pub fn new(transport: T, database: Option<String>) -> Self {
        Self {
            transport,
            database,
            open: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn request(&self, operation: Operation) -> Request {
        Request::new(operation, self.database.clone())
    }

    fn require_open(&self) -> BackendResult<()> {
        if !self.open {
            return Err(BackendError::read("Backend is not open"));
        }
        Ok(())
    }

    fn call(&self, request: Request) -> BackendResult<Reply> {
        let line = request
            .encode()
            .map_err(|e| BackendError::operation(e.to_string()))?;
        info!(operation = %request.operation(), database = ?request.database(), "sending request");

        let output = self.transport.call(&line)?;
        let response = Response::parse(&output.stdout, &output.stderr, output.status)?;
        debug!(code = response.code().as_u16(), "received response");
        response.into_reply()
    }

    fn call_for_result(&self, request: Request) -> BackendResult<OpResult> {
        match self.call(request)? {
            Reply::Result(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }
}

/// Attach an argument, mapping encoding failures to an operation error
fn with<T: Serialize + ?Sized>(request: Request, name: &str, value: &T) -> BackendResult<Request> {
    request
        .with(name, value)
        .map_err(|e| BackendError::operation(e.to_string()))
}

impl<T: Transport> Backend for RemoteBackend<T> {
    fn authenticate(&mut self, credentials: &Credentials) -> BackendResult<AuthToken> {
        // the peer authenticates the ssh user itself
        Ok(AuthToken::new(credentials.username.clone()))
    }

    fn list(&mut self, _token: &AuthToken) -> BackendResult<Vec<String>> {
        match self.call(self.request(Operation::List))? {
            Reply::List(items) => Ok(items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()),
            other => Err(unexpected(&other)),
        }
    }

    fn insert(
        &mut self,
        _token: &AuthToken,
        records: Vec<Record>,
        kvp: &KeyValuePairs,
    ) -> BackendResult<InsertResult> {
        self.require_open()?;
        let request = with(self.request(Operation::Insert), "records", &records)?;
        let request = with(request, "kvp", kvp)?;
        match self.call_for_result(request)? {
            OpResult::Insert(r) => Ok(r),
            other => Err(unexpected(&Reply::Result(other))),
        }
    }

    fn update(
        &mut self,
        _token: &AuthToken,
        records: Vec<Record>,
        upsert: bool,
        replace: bool,
    ) -> BackendResult<UpdateResult> {
        self.require_open()?;
        let request = with(self.request(Operation::Update), "records", &records)?;
        let request = with(request, "upsert", &upsert)?;
        let request = with(request, "replace", &replace)?;
        match self.call_for_result(request)? {
            OpResult::Update(r) => Ok(r),
            other => Err(unexpected(&Reply::Result(other))),
        }
    }

    fn remove(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        just_one: bool,
    ) -> BackendResult<RemoveResult> {
        self.require_open()?;
        let request = with(self.request(Operation::Remove), "filter", filter)?;
        let request = with(request, "just_one", &just_one)?;
        match self.call_for_result(request)? {
            OpResult::Remove(r) => Ok(r),
            other => Err(unexpected(&Reply::Result(other))),
        }
    }

    fn find(&mut self, _token: &AuthToken, query: &FindQuery) -> BackendResult<Cursor> {
        self.require_open()?;
        let request = with(self.request(Operation::Find), "filter", &query.filter)?;
        let request = with(request, "sort", &query.sort)?;
        let request = with(request, "limit", &query.limit)?;
        let request = with(request, "projection", &query.projection)?;
        match self.call(request)? {
            Reply::Records(rows) => Ok(Cursor::new(rows)),
            other => Err(unexpected(&other)),
        }
    }

    fn add_keys(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        kvp: &KeyValuePairs,
    ) -> BackendResult<AddKeysResult> {
        self.require_open()?;
        let request = with(self.request(Operation::AddKeys), "filter", filter)?;
        let request = with(request, "kvp", kvp)?;
        match self.call_for_result(request)? {
            OpResult::AddKeys(r) => Ok(r),
            other => Err(unexpected(&Reply::Result(other))),
        }
    }

    fn remove_keys(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        keys: &[String],
    ) -> BackendResult<RemoveKeysResult> {
        self.require_open()?;
        let request = with(self.request(Operation::RemoveKeys), "filter", filter)?;
        let request = with(request, "keys", keys)?;
        match self.call_for_result(request)? {
            OpResult::RemoveKeys(r) => Ok(r),
            other => Err(unexpected(&Reply::Result(other))),
        }
    }

    fn open(&mut self) -> BackendResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
