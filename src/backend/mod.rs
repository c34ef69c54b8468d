//! Backend contract for abcd
//!
//! Every storage engine implements [`Backend`]. The CLI, the dispatcher
//! and the remote client only ever talk to this trait, so an engine can be
//! swapped without touching the query compiler, the translator or the
//! transport.
//!
//! Engines shipped here:
//! - `file`: JSON files under a databases directory, no native OR
//! - `memory`: shared in-process rows, evaluates filters natively

mod errors;
mod file;
mod matcher;
mod memory;
mod registry;
mod results;

use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::query::Filter;

pub use errors::{BackendError, BackendResult};
pub use file::FileBackend;
pub use matcher::{FieldSource, RecordMatcher};
pub use memory::MemoryBackend;
pub use registry::{BackendRegistry, BackendSettings, Constructor};
pub use results::{
    AddKeysResult, InsertResult, OpResult, RemoveKeysResult, RemoveResult, UpdateResult,
};

/// A structure record: a flat-or-nested JSON object
pub type Record = Map<String, Value>;

/// Key-value pairs merged into records by insert and add-keys
pub type KeyValuePairs = Map<String, Value>;

/// Key holding a record's stable unique id
pub const UID_KEY: &str = "uid";

/// User names a backend refuses to authenticate
pub const RESERVED_USERNAMES: &[&str] = &["public", "all", "local"];

/// Returns the record's uid, if it has a non-null string one
pub fn uid_of(record: &Record) -> Option<&str> {
    record.get(UID_KEY).and_then(Value::as_str)
}

pub(crate) fn new_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// True for names made only of ASCII letters, digits and underscores
pub fn is_valid_name(name: &str) -> bool {
    static NAME: OnceLock<Option<Regex>> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(name))
}

/// Reject reserved and malformed user names
pub fn check_username(username: &str) -> BackendResult<()> {
    if RESERVED_USERNAMES.contains(&username) {
        return Err(BackendError::Authentication(format!(
            "User name '{}' is reserved",
            username
        )));
    }
    if !is_valid_name(username) {
        return Err(BackendError::Authentication(format!(
            "Invalid user name '{}'",
            username
        )));
    }
    Ok(())
}

/// Refuse key-value pairs or key lists that would touch the uid
pub(crate) fn check_not_uid<'a, I>(keys: I) -> BackendResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    if keys.into_iter().any(|k| k == UID_KEY) {
        return Err(BackendError::operation("The uid of a record cannot be changed"));
    }
    Ok(())
}

/// Pair every record with its uid, failing before anything is touched
/// if one of them has none.
pub(crate) fn keyed_by_uid(records: Vec<Record>) -> BackendResult<Vec<(String, Record)>> {
    records
        .into_iter()
        .map(|record| match uid_of(&record) {
            Some(uid) => Ok((uid.to_string(), record)),
            None => Err(BackendError::operation("Cannot update a record without uid")),
        })
        .collect()
}

/// Fold `update` into `target`; with `replace` the target is overwritten.
pub(crate) fn merge_record(target: &mut Record, update: Record, replace: bool) {
    if replace {
        *target = update;
    } else {
        target.extend(update);
    }
}

/// Who is asking. There is no password: the name only tags the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>) -> Self {
        Self { username }
    }
}

/// Opaque token returned by [`Backend::authenticate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthToken {
    username: Option<String>,
}

impl AuthToken {
    pub fn new(username: Option<String>) -> Self {
        Self { username }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// One sort column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Descending,
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.direction == Direction::Descending
    }
}

/// Which keys of each found record to return.
///
/// Keeping and omitting are separate variants so they can never be
/// requested together. The uid is always returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keys", rename_all = "lowercase")]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn apply(&self, record: Record) -> Record {
        match self {
            Projection::All => record,
            Projection::Include(keys) => record
                .into_iter()
                .filter(|(k, _)| k == UID_KEY || keys.contains(k))
                .collect(),
            Projection::Exclude(keys) => record
                .into_iter()
                .filter(|(k, _)| k == UID_KEY || !keys.contains(k))
                .collect(),
        }
    }
}

/// Everything `find` needs besides the token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    /// 0 means unbounded
    pub limit: usize,
    pub projection: Projection,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Lazy sequence of found records
pub struct Cursor {
    rows: Box<dyn Iterator<Item = Record>>,
}

impl Cursor {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: 'static,
    {
        Self {
            rows: Box::new(rows.into_iter()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for Cursor {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.rows.next()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cursor")
    }
}

/// The operation set every storage engine implements.
///
/// Implementations check their own preconditions at the top of each
/// method: a selected, open database for data operations and write
/// permission for mutating ones.
pub trait Backend {
    fn authenticate(&mut self, credentials: &Credentials) -> BackendResult<AuthToken>;

    /// Names of the databases visible to the token's user
    fn list(&mut self, token: &AuthToken) -> BackendResult<Vec<String>>;

    /// Insert records. Records without a uid get one; records whose uid
    /// already exists are skipped, never overwritten.
    fn insert(
        &mut self,
        token: &AuthToken,
        records: Vec<Record>,
        kvp: &KeyValuePairs,
    ) -> BackendResult<InsertResult>;

    /// Update records by uid. `replace` overwrites, otherwise fields merge;
    /// `upsert` inserts records whose uid is unknown.
    fn update(
        &mut self,
        token: &AuthToken,
        records: Vec<Record>,
        upsert: bool,
        replace: bool,
    ) -> BackendResult<UpdateResult>;

    fn remove(
        &mut self,
        token: &AuthToken,
        filter: &Filter,
        just_one: bool,
    ) -> BackendResult<RemoveResult>;

    fn find(&mut self, token: &AuthToken, query: &FindQuery) -> BackendResult<Cursor>;

    fn add_keys(
        &mut self,
        token: &AuthToken,
        filter: &Filter,
        kvp: &KeyValuePairs,
    ) -> BackendResult<AddKeysResult>;

    fn remove_keys(
        &mut self,
        token: &AuthToken,
        filter: &Filter,
        keys: &[String],
    ) -> BackendResult<RemoveKeysResult>;

    fn open(&mut self) -> BackendResult<()>;

    fn close(&mut self) -> BackendResult<()>;

    fn is_open(&self) -> bool;
}

/// Keeps a backend open for the guard's lifetime.
///
/// Opens the backend if it is closed and closes it again on drop, but only
/// if this guard was the one that opened it.
pub struct OpenGuard<'a> {
    backend: &'a mut dyn Backend,
    did_open: bool,
}

impl<'a> OpenGuard<'a> {
    pub fn new(backend: &'a mut dyn Backend) -> BackendResult<Self> {
        let did_open = if backend.is_open() {
            false
        } else {
            backend.open()?;
            true
        };
        Ok(Self { backend, did_open })
    }
}

impl<'a> Deref for OpenGuard<'a> {
    type Target = dyn Backend + 'a;

    fn deref(&self) -> &Self::Target {
        self.backend
    }
}

impl<'a> DerefMut for OpenGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if self.did_open {
            if let Err(e) = self.backend.close() {
                warn!(error = %e, "failed to close backend");
            }
        }
    }
}
