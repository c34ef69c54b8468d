//! Remote-shell transport
//!
//! One request is one child process: the line goes to its stdin, stdout is
//! read to completion, stderr is kept for diagnostics.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::errors::CommunicationError;

/// Default bound on one remote invocation
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// What a finished invocation left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub status: Option<i32>,
}

/// Delivers one request line and returns the peer's output
pub trait Transport {
    fn call(&self, line: &str) -> Result<Output, CommunicationError>;
}

/// Runs `<program> <args..> <host> [command..]` and pipes the line through it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTransport {
    program: String,
    args: Vec<String>,
    host: String,
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl SshTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            program: "ssh".to_string(),
            args: vec!["-q".to_string(), "-T".to_string()],
            host: host.into(),
            command: Vec::new(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Command run on the remote side; empty leaves it to the forced command
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Bound each invocation; 0 waits forever
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Full argument vector after the program name
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(self.host.clone());
        argv.extend(self.command.iter().cloned());
        argv
    }

    async fn run(&self, line: &str) -> Result<Output, CommunicationError> {
        let spawn_err = |e: std::io::Error| CommunicationError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(self.command_line())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                // the peer may answer and exit without reading its input
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(CommunicationError::Io(e.to_string()));
                }
                warn!("remote closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CommunicationError::Io(e.to_string()))?;

        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }
}

impl Transport for SshTransport {
    fn call(&self, line: &str) -> Result<Output, CommunicationError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CommunicationError::Io(format!("Failed to create runtime: {}", e)))?;

        debug!(program = %self.program, host = %self.host, bytes = line.len(), "calling remote");
        let output = rt.block_on(async {
            match self.timeout {
                // dropping the future drops the child, which kills it
                Some(limit) => tokio::time::timeout(limit, self.run(line))
                    .await
                    .map_err(|_| CommunicationError::Timeout(limit.as_secs()))?,
                None => self.run(line).await,
            }
        })?;
        debug!(status = ?output.status, stdout_bytes = output.stdout.len(), "remote finished");
        Ok(output)
    }
}
