//! Build sessions.
//!
//! A session is one build. Its id is the local time the build started, and
//! every directory the build touches on the host is derived from that id and
//! the [`BuildLayout`]:
//!
//! ```text
//! {build_dir}/{prefix}{id}/
//!   rootfs-{id}/
//!   bootfs-{id}/
//!   rootfs-{id}.tar.gz
//!   bootfs-{id}.tar.gz
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::consts::{ARCHIVE_EXTENSION, BOOTFS_PREFIX, BUILD_ID_FORMAT, DEFAULT_BUILD_PREFIX, ROOTFS_PREFIX};
use crate::template::Vars;

/// Where builds live on the build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildLayout {
  /// Parent of every build directory. Relative paths are taken from the
  /// build user's home.
  pub build_dir: String,
  /// Prepended to the id to name the build directory.
  pub build_prefix: String,
}

impl Default for BuildLayout {
  fn default() -> Self {
    Self {
      build_dir: ".".to_string(),
      build_prefix: DEFAULT_BUILD_PREFIX.to_string(),
    }
  }
}

/// One build: its id and the directories derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSession {
  id: String,
  root_dir: String,
  rootfs_dir: String,
  bootfs_dir: String,
}

impl BuildSession {
  /// Start a session identified by the current local time.
  ///
  /// Two sessions created within the same second get the same id; use
  /// [`BuildSession::with_disambiguator`] when that matters.
  pub fn new(layout: &BuildLayout) -> Self {
    Self::with_id(layout, Local::now().format(BUILD_ID_FORMAT).to_string())
  }

  /// Session with a caller-chosen id, e.g. to resume or inspect a build.
  pub fn with_id(layout: &BuildLayout, id: impl Into<String>) -> Self {
    let id = id.into();
    let root_dir = join(&layout.build_dir, &format!("{}{}", layout.build_prefix, id));
    let rootfs_dir = join(&root_dir, &format!("{ROOTFS_PREFIX}{id}"));
    let bootfs_dir = join(&root_dir, &format!("{BOOTFS_PREFIX}{id}"));

    Self {
      id,
      root_dir,
      rootfs_dir,
      bootfs_dir,
    }
  }

  /// Current-time session whose id carries `-{suffix}`.
  pub fn with_disambiguator(layout: &BuildLayout, suffix: &str) -> Self {
    let id = format!("{}-{}", Local::now().format(BUILD_ID_FORMAT), suffix);
    Self::with_id(layout, id)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn root_dir(&self) -> &str {
    &self.root_dir
  }

  pub fn rootfs_dir(&self) -> &str {
    &self.rootfs_dir
  }

  pub fn bootfs_dir(&self) -> &str {
    &self.bootfs_dir
  }

  /// Directory name of the rootfs, relative to [`BuildSession::root_dir`].
  pub fn rootfs_name(&self) -> String {
    format!("{ROOTFS_PREFIX}{}", self.id)
  }

  pub fn bootfs_name(&self) -> String {
    format!("{BOOTFS_PREFIX}{}", self.id)
  }

  pub fn rootfs_archive(&self) -> String {
    format!("{}{ARCHIVE_EXTENSION}", self.rootfs_dir)
  }

  pub fn bootfs_archive(&self) -> String {
    format!("{}{ARCHIVE_EXTENSION}", self.bootfs_dir)
  }

  /// Variables a step can reference.
  pub fn vars(&self) -> Vars {
    [
      ("id", self.id.clone()),
      ("root_dir", self.root_dir.clone()),
      ("rootfs_dir", self.rootfs_dir.clone()),
      ("bootfs_dir", self.bootfs_dir.clone()),
      ("rootfs_name", self.rootfs_name()),
      ("bootfs_name", self.bootfs_name()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
  }
}

fn join(parent: &str, child: &str) -> String {
  if parent.is_empty() || parent == "." {
    return child.to_string();
  }
  format!("{}/{}", parent.trim_end_matches('/'), child)
}
