//! Packaging and shipping build output.
//!
//! Both operations run on the build host: the archive is created next to the
//! directory it packs, and `scp` copies it from there to the storage host.
//! Neither checks free space or verifies the transfer.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::consts::ARCHIVE_EXTENSION;
use crate::executor::{ExecError, RemoteExecutor, shell_quote};

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("cannot archive {dir_name:?}: {reason}")]
  InvalidName { dir_name: String, reason: &'static str },

  #[error("failed to archive {dir_name} in {parent_dir}: {source}")]
  Exec {
    dir_name: String,
    parent_dir: String,
    #[source]
    source: ExecError,
  },
}

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("failed to publish {archive} to {destination}: {source}")]
  Exec {
    archive: String,
    destination: String,
    #[source]
    source: ExecError,
  },
}

impl ArchiveError {
  pub fn exec_error(&self) -> Option<&ExecError> {
    match self {
      ArchiveError::Exec { source, .. } => Some(source),
      ArchiveError::InvalidName { .. } => None,
    }
  }
}

impl PublishError {
  pub fn exec_error(&self) -> Option<&ExecError> {
    match self {
      PublishError::Exec { source, .. } => Some(source),
    }
  }
}

/// Storage host receiving the archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
  pub host: String,
  pub user: String,
  pub dir: String,
}

impl PublishTarget {
  /// `scp` destination, e.g. `www-data@storage:/var/www/images/`.
  pub fn destination(&self) -> String {
    format!("{}@{}:{}/", self.user, self.host, self.dir.trim_end_matches('/'))
  }
}

/// Pack `parent_dir/dir_name` into `parent_dir/dir_name.tar.gz`.
///
/// Entries in the archive are relative to `parent_dir`. Returns the archive
/// path.
pub async fn archive(
  dir_name: &str,
  parent_dir: &str,
  executor: &impl RemoteExecutor,
) -> Result<String, ArchiveError> {
  if dir_name.is_empty() || dir_name.contains('/') {
    return Err(ArchiveError::InvalidName {
      dir_name: dir_name.to_string(),
      reason: "expected a single directory name",
    });
  }

  let file_name = format!("{dir_name}{ARCHIVE_EXTENSION}");
  let command = format!("tar czf {} {}", shell_quote(&file_name), shell_quote(dir_name));

  info!(dir = %dir_name, parent = %parent_dir, "creating archive");
  executor
    .run(&command, Some(parent_dir))
    .await
    .map_err(|source| ArchiveError::Exec {
      dir_name: dir_name.to_string(),
      parent_dir: parent_dir.to_string(),
      source,
    })?;

  Ok(format!("{}/{}", parent_dir.trim_end_matches('/'), file_name))
}

/// Copy `archive_path` from the build host to `target`.
///
/// A failed copy leaves the archive in place.
pub async fn publish(
  archive_path: &str,
  target: &PublishTarget,
  executor: &impl RemoteExecutor,
) -> Result<(), PublishError> {
  let destination = target.destination();
  let command = format!("scp {} {}", shell_quote(archive_path), shell_quote(&destination));

  info!(archive = %archive_path, dest = %destination, "publishing archive");
  executor
    .run(&command, None)
    .await
    .map_err(|source| PublishError::Exec {
      archive: archive_path.to_string(),
      destination,
      source,
    })?;

  Ok(())
}
