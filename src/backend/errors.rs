//! # Backend Errors
//!
//! Read and write failures stay distinct from every other failure all the
//! way to the CLI, including across the remote transport.

use thiserror::Error;

use crate::remote::CommunicationError;
use crate::translate::TranslationError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Storage unreachable, corrupt, or no database selected
    #[error("{0}")]
    Read(String),

    /// Write attempted without permission
    #[error("{0}")]
    Write(String),

    /// Malformed request, conflicting ids and everything else
    #[error("{0}")]
    Operation(String),

    #[error("{0}")]
    Authentication(String),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

impl BackendError {
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Stable kind name used in one-line error reports
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Read(_) => "ReadError",
            BackendError::Write(_) => "WriteError",
            BackendError::Operation(_) => "OperationError",
            BackendError::Authentication(_) => "AuthenticationError",
            BackendError::Translation(e) => e.kind(),
            BackendError::Communication(e) => e.kind(),
        }
    }
}
