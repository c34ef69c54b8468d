//! Backend registry: maps a configured backend name to a constructor

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use super::{Backend, BackendError, BackendResult, FileBackend, MemoryBackend};

/// Everything a constructor gets to build a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSettings {
    pub databases_dir: PathBuf,
    pub database: Option<String>,
    pub user: Option<String>,
}

pub type Constructor = Box<dyn Fn(&BackendSettings) -> BackendResult<Box<dyn Backend>>>;

pub struct BackendRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the `file` and `memory` stores.
    ///
    /// Every `memory` backend created by one registry shares the same rows.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("file", |settings: &BackendSettings| {
            let backend = FileBackend::new(
                &settings.databases_dir,
                settings.database.as_deref(),
                settings.user.as_deref(),
            )?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        });

        let shared = MemoryBackend::new();
        registry.register("memory", move |settings: &BackendSettings| {
            let backend = match &settings.database {
                Some(name) => shared.with_database(name.as_str()),
                None => shared.clone(),
            };
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        registry
    }

    /// Register a constructor, replacing any previous one with that name
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&BackendSettings) -> BackendResult<Box<dyn Backend>> + 'static,
    {
        self.constructors.insert(name.to_string(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, settings: &BackendSettings) -> BackendResult<Box<dyn Backend>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            BackendError::operation(format!(
                "Unknown backend '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        debug!(backend = name, database = ?settings.database, "creating backend");
        constructor(settings)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
