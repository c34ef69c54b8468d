//! Result types returned by write operations
//!
//! Field names on the wire follow the dictionaries existing remote peers
//! already emit (`_inserted_ids`, `_msg`, ...).

use serde::{Deserialize, Serialize};

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("1 {}", word)
    } else {
        format!("{} {}s", n, word)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResult {
    #[serde(rename = "_inserted_ids")]
    pub inserted_ids: Vec<String>,
    #[serde(rename = "_skipped_ids")]
    pub skipped_ids: Vec<String>,
    #[serde(rename = "_msg", default)]
    pub msg: String,
}

impl InsertResult {
    /// `total` is the number of records submitted
    pub fn new(inserted_ids: Vec<String>, skipped_ids: Vec<String>, total: usize) -> Self {
        let msg = format!("Inserted {}/{} configurations.", inserted_ids.len(), total);
        Self {
            inserted_ids,
            skipped_ids,
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    #[serde(rename = "_updated_ids")]
    pub updated_ids: Vec<String>,
    #[serde(rename = "_skipped_ids")]
    pub skipped_ids: Vec<String>,
    #[serde(rename = "_upserted_ids")]
    pub upserted_ids: Vec<String>,
    #[serde(rename = "_replaced_ids")]
    pub replaced_ids: Vec<String>,
    #[serde(rename = "_msg", default)]
    pub msg: String,
}

impl UpdateResult {
    pub fn new(
        updated_ids: Vec<String>,
        skipped_ids: Vec<String>,
        upserted_ids: Vec<String>,
        replaced_ids: Vec<String>,
        total: usize,
    ) -> Self {
        let msg = format!(
            "Updated {}/{} configurations.",
            updated_ids.len() + replaced_ids.len(),
            total
        );
        Self {
            updated_ids,
            skipped_ids,
            upserted_ids,
            replaced_ids,
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResult {
    #[serde(rename = "_removed_count")]
    pub removed_count: usize,
    #[serde(rename = "_msg", default)]
    pub msg: String,
}

impl RemoveResult {
    pub fn new(removed_count: usize) -> Self {
        Self {
            removed_count,
            msg: format!("Deleted {}", plural(removed_count, "row")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddKeysResult {
    #[serde(rename = "_modified_ids")]
    pub modified_ids: Vec<String>,
    #[serde(rename = "_no_of_kvp_added")]
    pub count_added: usize,
    #[serde(rename = "_msg", default)]
    pub msg: String,
}

impl AddKeysResult {
    pub fn new(modified_ids: Vec<String>, count_added: usize) -> Self {
        let msg = format!(
            "Added {} key-value pairs in total to {} configurations",
            count_added,
            modified_ids.len()
        );
        Self {
            modified_ids,
            count_added,
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveKeysResult {
    #[serde(rename = "_modified_ids")]
    pub modified_ids: Vec<String>,
    #[serde(rename = "_no_of_keys_removed")]
    pub count_removed: usize,
    #[serde(rename = "_msg", default)]
    pub msg: String,
}

impl RemoveKeysResult {
    pub fn new(modified_ids: Vec<String>, count_removed: usize) -> Self {
        let msg = format!(
            "Removed {} keys in total from {} configurations",
            count_removed,
            modified_ids.len()
        );
        Self {
            modified_ids,
            count_removed,
            msg,
        }
    }
}

/// Any write-operation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Insert(InsertResult),
    Update(UpdateResult),
    Remove(RemoveResult),
    AddKeys(AddKeysResult),
    RemoveKeys(RemoveKeysResult),
}

impl OpResult {
    /// Human-readable summary
    pub fn msg(&self) -> &str {
        match self {
            OpResult::Insert(r) => &r.msg,
            OpResult::Update(r) => &r.msg,
            OpResult::Remove(r) => &r.msg,
            OpResult::AddKeys(r) => &r.msg,
            OpResult::RemoveKeys(r) => &r.msg,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpResult::Insert(_) => "InsertResult",
            OpResult::Update(_) => "UpdateResult",
            OpResult::Remove(_) => "RemoveResult",
            OpResult::AddKeys(_) => "AddKeysResult",
            OpResult::RemoveKeys(_) => "RemoveKeysResult",
        }
    }
}

impl From<InsertResult> for OpResult {
    fn from(r: InsertResult) -> Self {
        OpResult::Insert(r)
    }
}

impl From<UpdateResult> for OpResult {
    fn from(r: UpdateResult) -> Self {
        OpResult::Update(r)
    }
}

impl From<RemoveResult> for OpResult {
    fn from(r: RemoveResult) -> Self {
        OpResult::Remove(r)
    }
}

impl From<AddKeysResult> for OpResult {
    fn from(r: AddKeysResult) -> Self {
        OpResult::AddKeys(r)
    }
}

impl From<RemoveKeysResult> for OpResult {
    fn from(r: RemoveKeysResult) -> Self {
        OpResult::RemoveKeys(r)
    }
}
