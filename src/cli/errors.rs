//! CLI-specific error types
//!
//! Every error the CLI can report, each with a stable kind name for the
//! one-line `Kind: message` report.

use std::io;

use thiserror::Error;

use crate::backend::BackendError;
use crate::query::QueryError;
use crate::remote::CommunicationError;
use crate::translate::TranslationError;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, unreadable or invalid
    #[error("{0}")]
    Config(String),

    /// Local file or stream I/O
    #[error("{0}")]
    Io(String),

    /// Conflicting or malformed command-line arguments
    #[error("{0}")]
    Usage(String),

    /// Forwarded command exited unsuccessfully on the peer
    #[error("Remote command failed ({})", status_text(.status))]
    Remote { status: Option<i32> },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CliError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Config(_) => "ConfigError",
            CliError::Io(_) => "IoError",
            CliError::Usage(_) => "UsageError",
            CliError::Remote { .. } => "RemoteError",
            CliError::Query(e) => e.kind(),
            CliError::Backend(e) => e.kind(),
        }
    }

    /// Extra diagnostics worth showing at high verbosity
    pub fn detail(&self) -> Option<String> {
        match self {
            CliError::Backend(BackendError::Communication(e)) => e.detail(),
            _ => None,
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<TranslationError> for CliError {
    fn from(e: TranslationError) -> Self {
        Self::Backend(e.into())
    }
}

impl From<CommunicationError> for CliError {
    fn from(e: CommunicationError) -> Self {
        Self::Backend(e.into())
    }
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "killed by signal".to_string(),
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
