//! # Remote Errors

use thiserror::Error;

/// A request or response line that does not follow the wire format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Empty request")]
    Empty,

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Unknown argument '{argument}' for {operation}")]
    UnknownArgument { operation: String, argument: String },

    #[error("Duplicate argument '{0}'")]
    DuplicateArgument(String),

    #[error("Missing argument '{argument}' for {operation}")]
    MissingArgument { operation: String, argument: String },

    #[error("Malformed argument '{0}', expected name=value")]
    MalformedArgument(String),

    #[error("Invalid base64 in {field}: {reason}")]
    Base64 { field: String, reason: String },

    #[error("Invalid JSON in {field}: {reason}")]
    Json { field: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    Value { field: String, reason: String },
}

impl ProtocolError {
    pub fn kind(&self) -> &'static str {
        "ProtocolError"
    }
}

/// The transport failed or the peer answered with something unreadable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommunicationError {
    #[error("Remote returned an unexpected reply (exit status {status:?})")]
    BadHeader {
        stdout: String,
        stderr: String,
        status: Option<i32>,
    },

    #[error("Remote returned unknown response code {code}")]
    UnknownCode { code: String, stderr: String },

    #[error("Remote returned an undecodable payload for code {code}: {reason}")]
    BadPayload { code: u16, reason: String },

    #[error("Remote sent a {0} reply where another was expected")]
    UnexpectedReply(String),

    #[error("Failed to run remote command '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("I/O error talking to remote: {0}")]
    Io(String),

    #[error("Remote command timed out after {0} seconds")]
    Timeout(u64),
}

impl CommunicationError {
    pub fn kind(&self) -> &'static str {
        "CommunicationError"
    }

    /// Diagnostic text the peer left behind, shown at high verbosity
    pub fn detail(&self) -> Option<String> {
        match self {
            CommunicationError::BadHeader {
                stdout,
                stderr,
                status,
            } => Some(format!(
                "stdout: {:?}\nstderr: {}\nexit status: {}",
                stdout,
                stderr.trim_end(),
                status.map_or_else(|| "killed".to_string(), |s| s.to_string())
            )),
            CommunicationError::UnknownCode { stderr, .. } if !stderr.is_empty() => {
                Some(format!("stderr: {}", stderr.trim_end()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_header_detail_carries_diagnostics() {
        let err = CommunicationError::BadHeader {
            stdout: "oops".into(),
            stderr: "Permission denied\n".into(),
            status: Some(255),
        };
        let detail = err.detail().unwrap();
        assert!(detail.contains("\"oops\""));
        assert!(detail.contains("Permission denied"));
        assert!(detail.contains("255"));
        assert_eq!(err.kind(), "CommunicationError");
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            CommunicationError::Timeout(5).to_string(),
            "Remote command timed out after 5 seconds"
        );
        assert_eq!(CommunicationError::Timeout(5).detail(), None);
    }
}
