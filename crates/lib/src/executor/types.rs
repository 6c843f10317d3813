//! Types shared by the executors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to the build host.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The command ran and exited non-zero.
  #[error("command failed with exit code {}: {command}{}", display_code(*exit_code), display_stderr(stderr))]
  CommandFailed {
    command: String,
    exit_code: Option<i32>,
    stderr: String,
  },

  /// The transport could not reach the host or lost it mid-command.
  #[error("connection to {host} lost: {message}")]
  ConnectionLost { host: String, message: String },

  /// Reconnecting kept failing until the retry budget ran out.
  #[error("connection to {host} not recovered after {attempts} attempts: {message}")]
  RetriesExhausted {
    host: String,
    attempts: u32,
    message: String,
  },

  /// Reading a local upload source failed.
  #[error("failed to read {}: {source}", path.display())]
  ReadSource { path: PathBuf, source: std::io::Error },

  /// I/O error spawning a process or touching the local filesystem.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl ExecError {
  /// True for errors a reconnect may fix.
  pub fn is_connection_lost(&self) -> bool {
    matches!(self, ExecError::ConnectionLost { .. })
  }
}

fn display_code(code: Option<i32>) -> String {
  code.map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string())
}

fn display_stderr(stderr: &str) -> String {
  let stderr = stderr.trim();
  if stderr.is_empty() {
    String::new()
  } else {
    format!("\n{stderr}")
  }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  pub stdout: String,
  pub stderr: String,
  /// `None` when the process was killed by a signal.
  pub exit_code: Option<i32>,
}

impl CommandOutput {
  pub fn success(stdout: impl Into<String>) -> Self {
    Self {
      stdout: stdout.into(),
      stderr: String::new(),
      exit_code: Some(0),
    }
  }

  pub fn is_success(&self) -> bool {
    self.exit_code == Some(0)
  }

  /// Turn a non-zero exit into [`ExecError::CommandFailed`].
  pub fn check(self, command: &str) -> Result<CommandOutput, ExecError> {
    if self.is_success() {
      return Ok(self);
    }
    Err(ExecError::CommandFailed {
      command: command.to_string(),
      exit_code: self.exit_code,
      stderr: self.stderr,
    })
  }
}

/// What to place on the build host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
  /// In-memory content, e.g. a rendered template.
  Bytes(Vec<u8>),
  /// A file on the machine running pibake.
  Path(PathBuf),
}

impl UploadSource {
  pub async fn read(&self) -> Result<Vec<u8>, ExecError> {
    match self {
      UploadSource::Bytes(bytes) => Ok(bytes.clone()),
      UploadSource::Path(path) => tokio::fs::read(path).await.map_err(|source| ExecError::ReadSource {
        path: path.clone(),
        source,
      }),
    }
  }
}
