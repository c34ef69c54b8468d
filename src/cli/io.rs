//! Input parsing and output formatting for the CLI
//!
//! Records are printed as one JSON object per line. Everything here takes
//! explicit readers and writers so the formatting can be tested.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use crate::backend::{
    uid_of, KeyValuePairs, OpResult, Projection, Record, SortKey, UID_KEY,
};

use super::errors::{CliError, CliResult};

/// Read records from a file holding one JSON object or an array of them
pub fn read_records(path: &Path) -> CliResult<Vec<Record>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::io_error(format!("Failed to read {}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| CliError::io_error(format!("Invalid JSON in {}: {}", path.display(), e)))?;

    let not_record = || {
        CliError::io_error(format!(
            "{} must hold a JSON object or an array of objects",
            path.display()
        ))
    };
    match value {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                _ => Err(not_record()),
            })
            .collect(),
        _ => Err(not_record()),
    }
}

/// Split a comma separated list, dropping empty entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A number when the text parses as a finite one, the text otherwise
fn float_or_str(raw: &str) -> Value {
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::from(raw),
    }
}

/// Parse `K=V,K=V`. Values that look like numbers are stored as floats.
pub fn parse_kvp(raw: &str) -> CliResult<KeyValuePairs> {
    let mut kvp = KeyValuePairs::new();
    for pair in split_list(raw) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::usage(format!("Expected KEY=VALUE, got '{}'", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::usage(format!("Missing key in '{}'", pair)));
        }
        kvp.insert(key.to_string(), float_or_str(value.trim()));
    }
    Ok(kvp)
}

/// Parse `key[:A|:D],..`; a key without direction sorts ascending
pub fn parse_sort(raw: &str) -> CliResult<Vec<SortKey>> {
    split_list(raw)
        .into_iter()
        .map(|spec| match spec.split_once(':') {
            None => Ok(SortKey::ascending(spec)),
            Some((key, direction)) => match direction {
                "A" | "a" | "ascending" | "Ascending" | "ASCENDING" => Ok(SortKey::ascending(key)),
                "D" | "d" | "descending" | "Descending" | "DESCENDING" => {
                    Ok(SortKey::descending(key))
                }
                _ => Err(CliError::usage(format!(
                    "Unknown sort direction '{}' for key '{}'",
                    direction, key
                ))),
            },
        })
        .collect()
}

/// Turn `--keys` and `--omit-keys` into a projection
pub fn parse_projection(keys: Option<&str>, omit: bool) -> CliResult<Projection> {
    match keys {
        None if omit => Err(CliError::usage("No keys to omit specified. Use --keys")),
        None | Some("+") => Ok(Projection::All),
        Some(raw) if omit => Ok(Projection::Exclude(split_list(raw))),
        Some(raw) => Ok(Projection::Include(split_list(raw))),
    }
}

pub fn write_databases<W: Write>(out: &mut W, user: &str, names: &[String]) -> CliResult<()> {
    writeln!(out, "Hello, {}. Databases you have access to:", user)?;
    for name in names {
        writeln!(out, "   {}", name)?;
    }
    Ok(())
}

pub fn write_records<W, I>(out: &mut W, rows: I) -> CliResult<usize>
where
    W: Write,
    I: IntoIterator<Item = Record>,
{
    let mut n = 0;
    for row in rows {
        serde_json::to_writer(&mut *out, &row)?;
        writeln!(out)?;
        n += 1;
    }
    Ok(n)
}

pub fn write_ids<W, I>(out: &mut W, rows: I) -> CliResult<()>
where
    W: Write,
    I: IntoIterator<Item = Record>,
{
    for row in rows {
        if let Some(uid) = uid_of(&row) {
            writeln!(out, "{}", uid)?;
        }
    }
    Ok(())
}

/// Count how many records carry each key
pub fn key_counts<I: IntoIterator<Item = Record>>(rows: I) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        for key in row.keys() {
            if key != UID_KEY {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

pub fn write_key_counts<W: Write>(out: &mut W, counts: &BTreeMap<String, usize>) -> CliResult<()> {
    let width = counts.keys().map(String::len).max().unwrap_or(0);
    for (key, n) in counts {
        writeln!(out, "{:width$}  {}", key, n, width = width)?;
    }
    Ok(())
}

pub fn write_result<W: Write>(out: &mut W, result: &OpResult) -> CliResult<()> {
    writeln!(out, "{}", result.msg())?;
    Ok(())
}
