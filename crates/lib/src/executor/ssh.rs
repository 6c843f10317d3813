//! Executor that drives the build host through the system `ssh` client.
//!
//! Each call is one `ssh` invocation, so there is no session to keep alive
//! and a dropped connection only affects the call that saw it. `ssh` reserves
//! exit status 255 for its own errors; that status is reported as
//! [`ExecError::ConnectionLost`], every other status belongs to the command.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::types::{CommandOutput, ExecError};
use super::{RemoteExecutor, scoped_command, shell_quote};

/// Exit status used by `ssh` for connection and authentication errors.
const SSH_CONNECTION_ERROR: i32 = 255;

/// How to authenticate to the build host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
  /// Whatever `ssh` finds on its own: agent, `~/.ssh/config`, default keys.
  #[default]
  Agent,
  /// A specific private key.
  IdentityFile(PathBuf),
}

/// The build host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
  pub host: String,
  pub user: String,
  pub port: Option<u16>,
  pub auth: Auth,
}

impl RemoteTarget {
  pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      user: user.into(),
      port: None,
      auth: Auth::Agent,
    }
  }

  pub fn destination(&self) -> String {
    format!("{}@{}", self.user, self.host)
  }
}

/// Runs commands on a [`RemoteTarget`] with `ssh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
  target: RemoteTarget,
  program: String,
  connect_timeout_secs: u32,
}

impl SshExecutor {
  pub fn new(target: RemoteTarget) -> Self {
    Self {
      target,
      program: "ssh".to_string(),
      connect_timeout_secs: 15,
    }
  }

  /// Use another `ssh`-compatible client binary.
  pub fn with_program(mut self, program: impl Into<String>) -> Self {
    self.program = program.into();
    self
  }

  pub fn target(&self) -> &RemoteTarget {
    &self.target
  }

  /// Arguments passed to `ssh` to run `script` on the target.
  pub fn ssh_args(&self, script: &str) -> Vec<String> {
    let mut args = vec![
      "-o".to_string(),
      "BatchMode=yes".to_string(),
      "-o".to_string(),
      format!("ConnectTimeout={}", self.connect_timeout_secs),
    ];
    if let Some(port) = self.target.port {
      args.push("-p".to_string());
      args.push(port.to_string());
    }
    if let Auth::IdentityFile(path) = &self.target.auth {
      args.push("-i".to_string());
      args.push(path.to_string_lossy().to_string());
    }
    args.push(self.target.destination());
    args.push("--".to_string());
    args.push(script.to_string());
    args
  }

  async fn invoke(&self, script: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, ExecError> {
    let mut command = Command::new(&self.program);
    command
      .args(self.ssh_args(script))
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    // Ctrl-C must not kill ssh mid-step; that would look like a lost
    // connection and the command would be issued again.
    #[cfg(unix)]
    command.process_group(0);

    debug!(program = %self.program, target = %self.target.destination(), "spawning ssh");
    let mut child = command.spawn()?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
      // A broken pipe here means ssh exited early; its status says why.
      if let Err(e) = pipe.write_all(bytes).await {
        debug!(error = %e, "ssh stdin closed early");
      }
      drop(pipe);
    }

    let output = child.wait_with_output().await?;
    let result = CommandOutput {
      stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      exit_code: output.status.code(),
    };

    if result.exit_code == Some(SSH_CONNECTION_ERROR) {
      return Err(ExecError::ConnectionLost {
        host: self.target.host.clone(),
        message: result.stderr.trim().to_string(),
      });
    }

    Ok(result)
  }
}

impl RemoteExecutor for SshExecutor {
  fn describe(&self) -> String {
    self.target.destination()
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    info!(target = %self.target.host, cmd = %command, cwd = ?working_dir, "executing command");

    let output = self.invoke(&scoped_command(command, working_dir), None).await?;

    if !output.stdout.is_empty() {
      debug!(stdout = %output.stdout, "command stdout");
    }
    if !output.stderr.is_empty() {
      debug!(stderr = %output.stderr, "command stderr");
    }
    Ok(output)
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError> {
    debug!(path = %remote_path, size = bytes.len(), "writing remote file");

    let quoted = shell_quote(remote_path);
    let script = match mode {
      Some(mode) => format!("cat > {quoted} && chmod {mode:o} {quoted}"),
      None => format!("cat > {quoted}"),
    };

    self.invoke(&script, Some(bytes)).await?.check(&script)?;
    Ok(())
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    let script = format!("test -e {}", shell_quote(path));
    let output = self.invoke(&script, None).await?;
    match output.exit_code {
      Some(0) => Ok(true),
      Some(1) => Ok(false),
      _ => output.check(&script).map(|_| false),
    }
  }
}
