//! Reference file store
//!
//! One JSON file per database:
//!
//! ```text
//! <databases_dir>/<home>/NAME.json           writable
//! <databases_dir>/<home>_readonly/NAME.json  read-only
//! ```
//!
//! `<home>` is the user name, or `all` when no user is given. The store has
//! no native disjunction, so every filter goes through the translator and
//! the matching rows of all sub-queries are unioned.
//!
//! Every write holds an exclusive advisory lock on `NAME.lock` next to the
//! database file and reloads the table under it, so concurrent writers
//! serialize instead of overwriting each other.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::query::Filter;
use crate::translate::translate;

use super::{
    check_not_uid, check_username, is_valid_name, keyed_by_uid, merge_record, new_uid, uid_of,
    AddKeysResult, AuthToken, Backend, BackendError, BackendResult, Credentials, Cursor,
    FieldSource, FindQuery, InsertResult, KeyValuePairs, Record, RecordMatcher, RemoveKeysResult,
    RemoveResult, SortKey, UpdateResult, UID_KEY,
};

/// Home directory used when no user is given
pub const SHARED_HOME: &str = "all";

const READONLY_SUFFIX: &str = "_readonly";
const EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    id: u64,
    #[serde(default)]
    user: Option<String>,
    ctime: DateTime<Utc>,
    mtime: DateTime<Utc>,
    record: Record,
}

impl Row {
    fn uid(&self) -> Option<&str> {
        uid_of(&self.record)
    }

    /// Identity used to de-duplicate sub-query results
    fn identity(&self) -> String {
        match self.uid() {
            Some(uid) => uid.to_string(),
            None => format!("#{}", self.id),
        }
    }
}

impl FieldSource for Row {
    fn field(&self, key: &str) -> Option<Cow<'_, Value>> {
        match key {
            "id" => Some(Cow::Owned(Value::from(self.id))),
            "user" => self.user.as_ref().map(|u| Cow::Owned(Value::from(u.as_str()))),
            _ => self.record.get(key).map(Cow::Borrowed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    next_id: u64,
    rows: Vec<Row>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: Vec::new(),
        }
    }
}

/// Exclusive lock on a database's `NAME.lock` sibling, released on drop
#[derive(Debug)]
struct WriteLock {
    file: File,
    path: PathBuf,
}

impl WriteLock {
    fn acquire(database: &Path) -> BackendResult<Self> {
        let path = database.with_extension("lock");
        let lock_err = |e: std::io::Error| {
            BackendError::write(format!("Failed to lock {}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        FileExt::lock_exclusive(&file).map_err(lock_err)?;
        debug!(path = %path.display(), "acquired write lock");
        Ok(Self { file, path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release write lock");
        }
    }
}

/// Normalize a database argument to a bare name.
///
/// Takes the basename, strips a `.db` or `.json` suffix and checks the
/// remaining characters.
pub fn normalize_database_name(raw: &str) -> BackendResult<String> {
    let base = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let name = base
        .strip_suffix(".db")
        .or_else(|| base.strip_suffix(".json"))
        .unwrap_or(base);
    if !is_valid_name(name) {
        return Err(BackendError::operation(format!(
            "Invalid database name '{}': only letters, digits and underscores are allowed",
            raw
        )));
    }
    Ok(name.to_string())
}

#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    user: Option<String>,
    database: Option<String>,
    path: Option<PathBuf>,
    readonly: bool,
    table: Option<Table>,
}

impl FileBackend {
    /// Bind to `database` (if any) in the home of `user`.
    pub fn new(
        root: impl Into<PathBuf>,
        database: Option<&str>,
        user: Option<&str>,
    ) -> BackendResult<Self> {
        if let Some(user) = user {
            check_username(user)?;
        }
        let mut backend = Self {
            root: root.into(),
            user: user.map(String::from),
            database: None,
            path: None,
            readonly: false,
            table: None,
        };
        if let Some(raw) = database {
            let name = normalize_database_name(raw)?;
            let (path, readonly) = backend.resolve(&name);
            debug!(database = %name, path = %path.display(), readonly, "resolved database");
            backend.database = Some(name);
            backend.path = Some(path);
            backend.readonly = readonly;
        }
        Ok(backend)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn home(&self) -> &str {
        self.user.as_deref().unwrap_or(SHARED_HOME)
    }

    fn writable_dir(&self) -> PathBuf {
        self.root.join(self.home())
    }

    fn readonly_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", self.home(), READONLY_SUFFIX))
    }

    /// The writable copy wins; a database found nowhere is created writable.
    fn resolve(&self, name: &str) -> (PathBuf, bool) {
        let file = format!("{}.{}", name, EXTENSION);
        let writable = self.writable_dir().join(&file);
        if writable.exists() {
            return (writable, false);
        }
        let readonly = self.readonly_dir().join(&file);
        if readonly.exists() {
            return (readonly, true);
        }
        (writable, false)
    }

    fn load(path: &Path) -> BackendResult<Table> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Table::default()),
            Err(e) => {
                return Err(BackendError::read(format!(
                    "Failed to open database {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut content = String::new();
        file.read_to_string(&mut content).map_err(|e| {
            BackendError::read(format!("Failed to read database {}: {}", path.display(), e))
        })?;

        let table: Table = serde_json::from_str(&content).map_err(|e| {
            BackendError::read(format!("Corrupt database {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), rows = table.rows.len(), "loaded database");
        Ok(table)
    }

    /// Write to a sibling temp file, then rename over the database.
    fn save(path: &Path, table: &Table) -> BackendResult<()> {
        let write_err =
            |what: &str, e: &dyn std::fmt::Display| BackendError::write(format!("{} {}: {}", what, path.display(), e));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err("Failed to create directory for", &e))?;
        }
        let content = serde_json::to_string(table)
            .map_err(|e| write_err("Failed to serialize", &e))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| write_err("Failed to write", &e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| write_err("Failed to write", &e))?;
        file.sync_all().map_err(|e| write_err("Failed to sync", &e))?;

        fs::rename(&temp_path, path).map_err(|e| write_err("Failed to commit", &e))?;
        debug!(path = %path.display(), rows = table.rows.len(), "saved database");
        Ok(())
    }

    fn require_open(&self) -> BackendResult<&Table> {
        if self.database.is_none() {
            return Err(BackendError::read("No database selected"));
        }
        self.table
            .as_ref()
            .ok_or_else(|| BackendError::read("Backend is not open"))
    }

    fn require_writable(&mut self) -> BackendResult<&mut Table> {
        self.require_open()?;
        if self.readonly {
            return Err(BackendError::write("No write access"));
        }
        self.table
            .as_mut()
            .ok_or_else(|| BackendError::read("Backend is not open"))
    }

    /// Lock the database and reload it, so the write starts from what is on disk
    fn begin_write(&mut self) -> BackendResult<WriteLock> {
        self.require_writable()?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| BackendError::read("No database selected"))?;
        let lock = WriteLock::acquire(&path)?;
        self.table = Some(Self::load(&path)?);
        Ok(lock)
    }

    fn commit(&self) -> BackendResult<()> {
        match (&self.path, &self.table) {
            (Some(path), Some(table)) => Self::save(path, table),
            _ => Err(BackendError::read("Backend is not open")),
        }
    }

    /// Indices of rows matching the filter, de-duplicated and ordered.
    ///
    /// Each translated sub-query is run separately; sorting and limiting
    /// only happen on the union.
    fn select(
        table: &Table,
        filter: &Filter,
        sort: &[SortKey],
        limit: usize,
    ) -> BackendResult<Vec<usize>> {
        let queries = translate(filter)?;

        let mut seen = HashSet::new();
        let mut hits: Vec<usize> = Vec::new();
        for query in &queries {
            for (i, row) in table.rows.iter().enumerate() {
                if RecordMatcher::matches_sub_query(row, query) && seen.insert(row.identity()) {
                    hits.push(i);
                }
            }
        }

        hits.sort_by_key(|i| table.rows[*i].id);
        if !sort.is_empty() {
            let mut keyed: Vec<(usize, &Row)> = hits.iter().map(|i| (*i, &table.rows[*i])).collect();
            keyed.sort_by(|(_, a), (_, b)| RecordMatcher::compare_by(*a, *b, sort));
            hits = keyed.into_iter().map(|(i, _)| i).collect();
        }
        if limit > 0 {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    fn list_dir(dir: &Path, suffix: &str, names: &mut Vec<String>) -> BackendResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(BackendError::read(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push(format!("{}{}", stem, suffix));
            }
        }
        found.sort();
        names.extend(found);
        Ok(())
    }
}

impl Backend for FileBackend {
    fn authenticate(&mut self, credentials: &Credentials) -> BackendResult<AuthToken> {
        if let Some(user) = &credentials.username {
            check_username(user)?;
        }
        Ok(AuthToken::new(credentials.username.clone()))
    }

    fn list(&mut self, _token: &AuthToken) -> BackendResult<Vec<String>> {
        let mut names = Vec::new();
        Self::list_dir(&self.writable_dir(), "", &mut names)?;
        Self::list_dir(&self.readonly_dir(), " (readonly)", &mut names)?;
        Ok(names)
    }

    fn insert(
        &mut self,
        token: &AuthToken,
        records: Vec<Record>,
        kvp: &KeyValuePairs,
    ) -> BackendResult<InsertResult> {
        check_not_uid(kvp.keys())?;
        let _lock = self.begin_write()?;
        let table = self.require_writable()?;
        let total = records.len();
        let now = Utc::now();

        let mut seen: HashSet<String> = table.rows.iter().filter_map(Row::uid).map(String::from).collect();
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
            table.rows.push(Row {
                id: table.next_id,
                user: token.username().map(String::from),
                ctime: now,
                mtime: now,
                record,
            });
            table.next_id += 1;
            inserted.push(uid);
        }

        if !inserted.is_empty() {
            self.commit()?;
        }
        info!(inserted = inserted.len(), skipped = skipped.len(), "insert");
        Ok(InsertResult::new(inserted, skipped, total))
    }

    fn update(
        &mut self,
        token: &AuthToken,
        records: Vec<Record>,
        upsert: bool,
        replace: bool,
    ) -> BackendResult<UpdateResult> {
        let keyed = keyed_by_uid(records)?;
        let _lock = self.begin_write()?;
        let table = self.require_writable()?;
        let total = keyed.len();
        let now = Utc::now();

        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        let mut upserted = Vec::new();
        let mut replaced = Vec::new();
        for (uid, record) in keyed {
            match table.rows.iter_mut().find(|r| r.uid() == Some(uid.as_str())) {
                Some(row) => {
                    merge_record(&mut row.record, record, replace);
                    row.mtime = now;
                    if replace {
                        replaced.push(uid);
                    } else {
                        updated.push(uid);
                    }
                }
                None if upsert => {
                    table.rows.push(Row {
                        id: table.next_id,
                        user: token.username().map(String::from),
                        ctime: now,
                        mtime: now,
                        record,
                    });
                    table.next_id += 1;
                    upserted.push(uid);
                }
                None => skipped.push(uid),
            }
        }

        if skipped.len() < total {
            self.commit()?;
        }
        info!(updated = updated.len(), replaced = replaced.len(), upserted = upserted.len(), "update");
        Ok(UpdateResult::new(updated, skipped, upserted, replaced, total))
    }

    fn remove(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        just_one: bool,
    ) -> BackendResult<RemoveResult> {
        let _lock = self.begin_write()?;
        let table = self.require_writable()?;
        let hits = Self::select(table, filter, &[], if just_one { 1 } else { 0 })?;

        let doomed: HashSet<usize> = hits.into_iter().collect();
        let before = table.rows.len();
        let mut index = 0;
        table.rows.retain(|_| {
            let keep = !doomed.contains(&index);
            index += 1;
            keep
        });
        let removed = before - table.rows.len();

        if removed > 0 {
            self.commit()?;
        }
        info!(removed, "remove");
        Ok(RemoveResult::new(removed))
    }

    fn find(&mut self, _token: &AuthToken, query: &FindQuery) -> BackendResult<Cursor> {
        let table = self.require_open()?;
        let hits = Self::select(table, &query.filter, &query.sort, query.limit)?;
        let records: Vec<Record> = hits
            .into_iter()
            .map(|i| query.projection.apply(table.rows[i].record.clone()))
            .collect();
        Ok(Cursor::new(records))
    }

    fn add_keys(
        &mut self,
        _token: &AuthToken,
        filter: &Filter,
        kvp: &KeyValuePairs,
    ) -> BackendResult<AddKeysResult> {
        check_not_uid(kvp.keys())?;
        let _lock = self.begin_write()?;
        let table = self.require_writable()?;
        let hits = Self::select(table, filter, &[], 0)?;
        let now = Utc::now();

        let mut modified = Vec::new();
        let mut count = 0;
        for i in hits {
            let row = &mut table.rows[i];
            row.record.extend(kvp.clone());
            row.mtime = now;
            count += kvp.len();
            modified.push(row.identity());
        }

        if count > 0 {
            self.commit()?;
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
        let _lock = self.begin_write()?;
        let table = self.require_writable()?;
        let hits = Self::select(table, filter, &[], 0)?;
        let now = Utc::now();

        let mut modified = Vec::new();
        let mut count = 0;
        for i in hits {
            let row = &mut table.rows[i];
            let removed = keys
                .iter()
                .filter(|k| row.record.remove(k.as_str()).is_some())
                .count();
            if removed > 0 {
                row.mtime = now;
                count += removed;
                modified.push(row.identity());
            }
        }

        if count > 0 {
            self.commit()?;
        }
        Ok(RemoveKeysResult::new(modified, count))
    }

    fn open(&mut self) -> BackendResult<()> {
        let table = match &self.path {
            Some(path) => Self::load(path)?,
            None => Table::default(),
        };
        self.table = Some(table);
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        self.table = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.table.is_some()
    }
}
