//! Executor for the machine pibake runs on.
//!
//! Builds are often driven against `localhost`; going through SSH there only
//! adds a login. This executor runs the same command lines with `/bin/sh`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::types::{CommandOutput, ExecError};
use super::{RemoteExecutor, scoped_command};

/// Runs commands with the local `/bin/sh`.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
  shell: String,
}

impl LocalExecutor {
  pub fn new() -> Self {
    Self {
      shell: "/bin/sh".to_string(),
    }
  }

  /// Use a different POSIX shell, e.g. `/bin/bash`.
  pub fn with_shell(shell: impl Into<String>) -> Self {
    Self { shell: shell.into() }
  }
}

impl Default for LocalExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl RemoteExecutor for LocalExecutor {
  fn describe(&self) -> String {
    "localhost".to_string()
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    info!(cmd = %command, cwd = ?working_dir, "executing command");

    let script = scoped_command(command, working_dir);
    let mut cmd = Command::new(&self.shell);
    cmd.arg("-c").arg(&script).stdin(Stdio::null());
    // Own process group: a terminal Ctrl-C reaches pibake, not the step.
    #[cfg(unix)]
    cmd.process_group(0);
    let output = cmd.output().await?;

    let result = CommandOutput {
      stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      exit_code: output.status.code(),
    };

    if !result.stdout.is_empty() {
      debug!(stdout = %result.stdout, "command stdout");
    }
    if !result.stderr.is_empty() {
      debug!(stderr = %result.stderr, "command stderr");
    }

    Ok(result)
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError> {
    debug!(path = %remote_path, size = bytes.len(), "writing file");
    tokio::fs::write(remote_path, bytes).await?;

    if let Some(mode) = mode {
      set_mode(Path::new(remote_path), mode).await?;
    }
    Ok(())
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    Ok(tokio::fs::try_exists(path).await?)
  }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), ExecError> {
  use std::os::unix::fs::PermissionsExt;

  tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
  Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), ExecError> {
  Ok(())
}
