//! Configuration file
//!
//! Looked up at `--config PATH`, then `$ABCD_CONFIG`, then
//! `$XDG_CONFIG_HOME/abcd/config.json`, then `~/.config/abcd/config.json`.
//! A missing file means defaults; an explicitly named one must exist.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::remote::DEFAULT_TIMEOUT_SECS;

use super::errors::{CliError, CliResult};

/// Remote-shell settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_remote_args")]
    pub args: Vec<String>,

    /// Command run after the host; empty relies on the peer's forced command
    #[serde(default)]
    pub command: Vec<String>,

    /// 0 disables the timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_remote_args(),
            command: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Registered backend name
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_databases_dir")]
    pub databases_dir: PathBuf,

    /// Extra arguments placed before the user's own
    #[serde(default)]
    pub opts: Vec<String>,

    #[serde(default)]
    pub remote: RemoteConfig,
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_databases_dir() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("abcd_databases"),
        None => PathBuf::from("abcd_databases"),
    }
}

fn default_program() -> String {
    "ssh".to_string()
}

fn default_remote_args() -> Vec<String> {
    vec!["-q".to_string(), "-T".to_string()]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            databases_dir: default_databases_dir(),
            opts: Vec::new(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::config_error(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        debug!(path = %path.display(), backend = %config.backend, "loaded config");
        Ok(config)
    }

    /// Load from the first location that applies, or fall back to defaults
    pub fn discover(explicit: Option<&Path>) -> CliResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_location() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn default_location() -> Option<PathBuf> {
        if let Some(path) = env::var_os("ABCD_CONFIG") {
            return Some(PathBuf::from(path));
        }
        if let Some(dir) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(dir).join("abcd").join("config.json"));
        }
        env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("abcd")
                .join("config.json")
        })
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.backend.trim().is_empty() {
            return Err(CliError::config_error("backend must not be empty"));
        }
        if self.databases_dir.as_os_str().is_empty() {
            return Err(CliError::config_error("databases_dir must not be empty"));
        }
        if self.remote.program.trim().is_empty() {
            return Err(CliError::config_error("remote.program must not be empty"));
        }
        Ok(())
    }
}
