//! Command execution and file transfer on the build host.
//!
//! Every executor provides three primitives: run a shell command line and
//! report its exit status, write bytes to a path, and check whether a path
//! exists. The higher-level operations ([`RemoteExecutor::run`] and
//! [`RemoteExecutor::upload`]) are built on top of them and behave the same
//! for every transport.
//!
//! Executors hold no directory state between calls. A working directory is
//! passed explicitly to each command and only applies to that command.

pub mod local;
pub mod retry;
pub mod ssh;
pub mod types;

use tracing::debug;

use crate::consts::BACKUP_SUFFIX;

pub use local::LocalExecutor;
pub use retry::{RetryPolicy, RetryingExecutor};
pub use ssh::{Auth, RemoteTarget, SshExecutor};
pub use types::{CommandOutput, ExecError, UploadSource};

/// Runs commands and transfers files on one build host.
///
/// Calls must not be issued concurrently on one executor: the pipeline awaits
/// each one before starting the next.
#[allow(async_fn_in_trait)]
pub trait RemoteExecutor {
  /// Short description of the target for logs, e.g. `root@buildhost`.
  fn describe(&self) -> String;

  /// Run `command` through the host's shell and report how it exited.
  ///
  /// A non-zero exit is not an error here; transport problems are.
  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError>;

  /// Write `bytes` to `remote_path`, replacing any existing file.
  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError>;

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError>;

  /// Re-establish the connection after [`ExecError::ConnectionLost`].
  async fn reconnect(&self) -> Result<(), ExecError> {
    Ok(())
  }

  /// Run `command`, failing with [`ExecError::CommandFailed`] on a non-zero exit.
  async fn run(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    self.execute(command, working_dir).await?.check(command)
  }

  /// Run `command` and return its output whatever the exit status.
  async fn run_allow_failure(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    let output = self.execute(command, working_dir).await?;
    if !output.is_success() {
      debug!(cmd = %command, code = ?output.exit_code, "ignoring command failure");
    }
    Ok(output)
  }

  /// Place `source` at `remote_path`.
  ///
  /// With `make_backup`, an existing file is first copied to
  /// `<remote_path>.bak`.
  async fn upload(
    &self,
    source: &UploadSource,
    remote_path: &str,
    mode: Option<u32>,
    make_backup: bool,
  ) -> Result<(), ExecError> {
    let bytes = source.read().await?;

    if make_backup && self.path_exists(remote_path).await? {
      let backup = backup_path(remote_path);
      debug!(path = %remote_path, backup = %backup, "backing up existing file");
      self
        .run(&format!("cp -p {} {}", shell_quote(remote_path), shell_quote(&backup)), None)
        .await?;
    }

    self.write_file(&bytes, remote_path, mode).await
  }
}

/// Local or SSH transport, chosen at run time.
#[derive(Debug, Clone)]
pub enum HostExecutor {
  Local(LocalExecutor),
  Ssh(SshExecutor),
}

impl RemoteExecutor for HostExecutor {
  fn describe(&self) -> String {
    match self {
      HostExecutor::Local(e) => e.describe(),
      HostExecutor::Ssh(e) => e.describe(),
    }
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    match self {
      HostExecutor::Local(e) => e.execute(command, working_dir).await,
      HostExecutor::Ssh(e) => e.execute(command, working_dir).await,
    }
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError> {
    match self {
      HostExecutor::Local(e) => e.write_file(bytes, remote_path, mode).await,
      HostExecutor::Ssh(e) => e.write_file(bytes, remote_path, mode).await,
    }
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    match self {
      HostExecutor::Local(e) => e.path_exists(path).await,
      HostExecutor::Ssh(e) => e.path_exists(path).await,
    }
  }

  async fn reconnect(&self) -> Result<(), ExecError> {
    match self {
      HostExecutor::Local(e) => e.reconnect().await,
      HostExecutor::Ssh(e) => e.reconnect().await,
    }
  }
}

/// Path under which the previous content of `remote_path` is kept.
pub fn backup_path(remote_path: &str) -> String {
  format!("{remote_path}{BACKUP_SUFFIX}")
}

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
  let plain = !value.is_empty()
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '=' | ',' | '@'));
  if plain {
    return value.to_string();
  }
  format!("'{}'", value.replace('\'', r"'\''"))
}

/// Prefix `command` with a `cd` into `working_dir`.
///
/// The `cd` is part of the same shell invocation, so the directory never
/// outlives the command. A failed `cd` exits the whole script, compound
/// commands included.
pub fn scoped_command(command: &str, working_dir: Option<&str>) -> String {
  match working_dir {
    Some(dir) => format!("cd {} || exit 1\n{}", shell_quote(dir), command),
    None => command.to_string(),
  }
}
