//! Bounded reconnect-and-retry around another executor.
//!
//! Only [`ExecError::ConnectionLost`] is retried. A command that ran and
//! failed is never reissued. Every retried call carries its own working
//! directory, so a fresh connection resumes in the directory the caller asked
//! for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{error, warn};

use super::RemoteExecutor;
use super::types::{CommandOutput, ExecError};

/// How many times to try a call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first one. At least 1.
  pub max_attempts: u32,
  /// Delay before the first retry; doubles on each further retry.
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff: Duration::from_secs(2),
      max_backoff: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  /// Fail on the first connection error.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay before retry number `retry` (1-based).
  pub fn backoff(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
  }
}

/// Wraps an executor and retries calls that lost the connection.
#[derive(Debug)]
pub struct RetryingExecutor<E> {
  inner: E,
  policy: RetryPolicy,
  retries: AtomicUsize,
}

impl<E: RemoteExecutor> RetryingExecutor<E> {
  pub fn new(inner: E, policy: RetryPolicy) -> Self {
    Self {
      inner,
      policy,
      retries: AtomicUsize::new(0),
    }
  }

  pub fn inner(&self) -> &E {
    &self.inner
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Number of retries issued so far, across all calls.
  pub fn retries(&self) -> usize {
    self.retries.load(Ordering::Relaxed)
  }

  async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ExecError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
  {
    let max_attempts = self.policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      let err = match call().await {
        Err(e) if e.is_connection_lost() => e,
        other => return other,
      };

      if attempt >= max_attempts {
        error!(op = %what, attempts = attempt, error = %err, "giving up on connection");
        return Err(ExecError::RetriesExhausted {
          host: self.inner.describe(),
          attempts: attempt,
          message: err.to_string(),
        });
      }

      let delay = self.policy.backoff(attempt);
      warn!(op = %what, attempt, delay = ?delay, error = %err, "connection lost, retrying");
      tokio::time::sleep(delay).await;
      self.retries.fetch_add(1, Ordering::Relaxed);
      attempt += 1;

      if let Err(e) = self.inner.reconnect().await {
        if !e.is_connection_lost() {
          return Err(e);
        }
        warn!(error = %e, "reconnect failed");
      }
    }
  }
}

impl<E: RemoteExecutor> RemoteExecutor for RetryingExecutor<E> {
  fn describe(&self) -> String {
    self.inner.describe()
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    self
      .with_retry("execute", || self.inner.execute(command, working_dir))
      .await
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError> {
    self
      .with_retry("write_file", || self.inner.write_file(bytes, remote_path, mode))
      .await
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    self.with_retry("path_exists", || self.inner.path_exists(path)).await
  }

  async fn reconnect(&self) -> Result<(), ExecError> {
    self.inner.reconnect().await
  }
}
