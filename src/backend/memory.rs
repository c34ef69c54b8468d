//! In-memory store
//!
//! Rows live behind a shared handle, so clones of a `MemoryBackend` see
//! the same databases. Filters are evaluated natively, without the
//! sub-query expansion the file store needs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::query::Filter;
use crate::translate::check_membership;

use super::{
    check_not_uid, check_username, keyed_by_uid, merge_record, new_uid, uid_of, AddKeysResult, AuthToken,
    Backend, BackendError, BackendResult, Credentials, Cursor, FindQuery, InsertResult,
    KeyValuePairs, Record, RecordMatcher, RemoveKeysResult, RemoveResult, UpdateResult, UID_KEY,
};

type Databases = BTreeMap<String, Vec<Record>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    databases: Arc<Mutex<Databases>>,
    database: Option<String>,
    readonly: bool,
    open: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same rows bound to another database
    pub fn with_database(&self, name: impl Into<String>) -> Self {
        Self {
            databases: Arc::clone(&self.databases),
            database: Some(name.into()),
            readonly: self.readonly,
            open: false,
        }
    }

    pub fn select_database(&mut self, name: impl Into<String>) {
        self.database = Some(name.into());
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    /// Snapshot of a database's records, in insertion order
    pub fn records(&self, database: &str) -> BackendResult<Vec<Record>> {
        Ok(self.lock()?.get(database).cloned().unwrap_or_default())
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, Databases>> {
        self.databases
            .lock()
            .map_err(|_| BackendError::read("In-memory store is poisoned"))
    }

    /// The bound database name, checking the backend is usable
    fn require_open(&self) -> BackendResult<String> {
        if !self.open {
            return Err(BackendError::read("Backend is not open"));
        }
        self.database
            .clone()
            .ok_or_else(|| BackendError::read("No database selected"))
    }

    fn require_writable(&self) -> BackendResult<String> {
        let name = self.require_open()?;
        if self.readonly {
            return Err(BackendError::write("No write access"));
        }
        Ok(name)
    }

    fn matching(&self, filter: &Filter) -> BackendResult<(String, Vec<usize>)> {
        check_membership(filter)?;
        let name = self.require_open()?;
        let databases = self.lock()?;
        let indices = databases
            .get(&name)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .filter(|(_, r)| RecordMatcher::matches_filter(*r, filter))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();
        Ok((name, indices))
    }
}

impl Backend for MemoryBackend {
    fn authenticate(&mut self, credentials: &Credentials) -> BackendResult<AuthToken> {
        if let Some(user) = &credentials.username {
            check_username(user)?;
        }
        Ok(AuthToken::new(credentials.username.clone()))
    }

    fn list(&mut self, _token: &AuthToken) -> BackendResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn insert(
        &mut self,
        _token: &AuthToken,
        records: Vec<Record>,
        kvp: &KeyValuePairs,
    ) -> BackendResult<InsertResult> {
        check_not_uid(kvp.keys())?;
        let name = self.require_writable()?;
        let total = records.len();

        let mut databases = self.lock()?;
        let rows = databases.entry(name).or_default();
        let mut seen: HashSet<String> = rows.iter().filter_map(uid_of).map(String::from).collect();

        let mut inserted = Vec::new();
        let mut skipped = Vec::new();
        for mut record in records {
            let uid = match uid_of(&record) {
                Some(uid) => uid.to_string(),
                None => {
                    let uid = new_uid();
                    record.insert(UID_KEY.to_string(), uid.clone().into());
                    uid
                }
            };
            if !seen.insert(uid.clone()) {
                skipped.push(uid);
                continue;
            }
            record.extend(kvp.clone());
            rows.push(record);
            inserted.push(uid);
        }

        debug!(inserted = inserted.len(), skipped = skipped.len(), "memory insert");
        Ok(InsertResult::new(inserted, skipped, total))
    }

    fn update(
        &mut self,
        _token: &AuthToken,
        records: Vec<Record>,
        upsert: bool,
        replace: bool,
    ) -> BackendResult<UpdateResult> {
        let name = self.require_writable()?;
        let keyed = keyed_by_uid(records)?;
        let total = keyed.len();

        let mut databases = self.lock()?;
        let rows = databases.entry(name).or_default();

        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        let mut upserted = Vec::new();
        let mut replaced = Vec::new();
        for (uid, record) in keyed {
            match rows.iter_mut().find(|r| uid_of(r) == Some(uid.as_str())) {
                Some(existing) => {
                    merge_record(existing, record, replace);
                    if replace {
                        replaced.push(uid);
                    } else {
                        updated.push(uid);
                    }
                }
                None if upsert => {
                    rows.push(record);
                    upserted.push(uid);
                }
                None => skipped.push(uid),
            }
        }

        Ok(UpdateResult::new(updated, skipped, upserted, replaced, total))
    }

    fn remove(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        just_one: bool,
    ) -> BackendResult<RemoveResult> {
        self.require_writable()?;
        let (name, mut indices) = self.matching(filter)?;
        if just_one {
            indices.truncate(1);
        }

        let mut databases = self.lock()?;
        if let Some(rows) = databases.get_mut(&name) {
            for i in indices.iter().rev() {
                rows.remove(*i);
            }
        }
        Ok(RemoveResult::new(indices.len()))
    }

    fn find(&mut self, _token: &AuthToken, query: &FindQuery) -> BackendResult<Cursor> {
        let (name, indices) = self.matching(&query.filter)?;
        let mut found: Vec<Record> = {
            let databases = self.lock()?;
            match databases.get(&name) {
                Some(rows) => indices.iter().map(|i| rows[*i].clone()).collect(),
                None => Vec::new(),
            }
        };

        RecordMatcher::sort(&mut found, &query.sort);
        if query.limit > 0 {
            found.truncate(query.limit);
        }
        let projection = query.projection.clone();
        Ok(Cursor::new(
            found.into_iter().map(move |r| projection.apply(r)),
        ))
    }

    fn add_keys(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        kvp: &KeyValuePairs,
    ) -> BackendResult<AddKeysResult> {
        check_not_uid(kvp.keys())?;
        self.require_writable()?;
        let (name, indices) = self.matching(filter)?;

        let mut databases = self.lock()?;
        let mut modified = Vec::new();
        let mut count = 0;
        if let Some(rows) = databases.get_mut(&name) {
            for i in indices {
                let row = &mut rows[i];
                row.extend(kvp.clone());
                count += kvp.len();
                if let Some(uid) = uid_of(row) {
                    modified.push(uid.to_string());
                }
            }
        }
        Ok(AddKeysResult::new(modified, count))
    }

    fn remove_keys(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        keys: &[String],
    ) -> BackendResult<RemoveKeysResult> {
        check_not_uid(keys)?;
        self.require_writable()?;
        let (name, indices) = self.matching(filter)?;

        let mut databases = self.lock()?;
        let mut modified = Vec::new();
        let mut count = 0;
        if let Some(rows) = databases.get_mut(&name) {
            for i in indices {
                let row = &mut rows[i];
                let removed = keys.iter().filter(|k| row.remove(k.as_str()).is_some()).count();
                if removed > 0 {
                    count += removed;
                    if let Some(uid) = uid_of(row) {
                        modified.push(uid.to_string());
                    }
                }
            }
        }
        Ok(RemoveKeysResult::new(modified, count))
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
