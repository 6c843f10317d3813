//! Template sources.
//!
//! Template content (configuration files, install scripts, host keys) lives
//! outside this crate. A [`TemplateStore`] maps a logical id to its bytes.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::TemplateError;

/// Resolves a template id to its content.
pub trait TemplateStore {
  fn load(&self, id: &str) -> Result<Vec<u8>, TemplateError>;
}

/// Templates read from a directory tree.
///
/// The id is a relative path under the root. Named mounts redirect ids whose
/// first component matches the mount name, so `keys/etc/ssh/ssh_host_rsa_key`
/// can live in a separate checkout from the regular templates.
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
  root: PathBuf,
  mounts: BTreeMap<String, PathBuf>,
}

impl DirTemplateStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      mounts: BTreeMap::new(),
    }
  }

  pub fn mount(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
    self.mounts.insert(name.into(), dir.into());
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Map an id to a file path, rejecting ids that escape their root.
  pub fn path_for(&self, id: &str) -> Result<PathBuf, TemplateError> {
    let relative = Path::new(id);
    let escapes = relative
      .components()
      .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if id.is_empty() || escapes {
      return Err(TemplateError::NotFound { id: id.to_string() });
    }

    if let Some(dir) = id
      .split_once('/')
      .and_then(|(head, rest)| self.mounts.get(head).map(|dir| dir.join(rest)))
    {
      return Ok(dir);
    }

    Ok(self.root.join(relative))
  }
}

impl TemplateStore for DirTemplateStore {
  fn load(&self, id: &str) -> Result<Vec<u8>, TemplateError> {
    let path = self.path_for(id)?;
    match fs::read(&path) {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TemplateError::NotFound { id: id.to_string() }),
      Err(source) => Err(TemplateError::Read {
        id: id.to_string(),
        path,
        source,
      }),
    }
  }
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
  templates: HashMap<String, Vec<u8>>,
}

impl MemoryTemplateStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
    self.insert(id, content);
    self
  }

  pub fn insert(&mut self, id: impl Into<String>, content: impl Into<Vec<u8>>) {
    self.templates.insert(id.into(), content.into());
  }
}

impl TemplateStore for MemoryTemplateStore {
  fn load(&self, id: &str) -> Result<Vec<u8>, TemplateError> {
    self
      .templates
      .get(id)
      .cloned()
      .ok_or_else(|| TemplateError::NotFound { id: id.to_string() })
  }
}
