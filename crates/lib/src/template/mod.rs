//! Variable substitution and template uploads.
//!
//! Command lines, paths and configuration files reference values that are only
//! known once a build session exists (its id, its rootfs directory, ...). This
//! module parses those references and substitutes them from a variable map.
//!
//! # Syntax
//!
//! - `$${name}` - the value of variable `name`
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` or `$(which qemu-arm-static)` work without escaping. Use `$$${` to
//! produce a literal `$${`.
//!
//! A reference to a variable that is not in the map is an error. Nothing is
//! ever replaced by an empty string.
//!
//! # Example
//!
//! ```
//! use pibake_lib::template::{Segment, Vars, parse, substitute};
//!
//! let segments = parse("mkdir -p $${rootfs_dir}/var/tmp").unwrap();
//! assert_eq!(segments[0], Segment::Literal("mkdir -p ".to_string()));
//! assert_eq!(segments[1], Segment::Variable("rootfs_dir".to_string()));
//!
//! let mut vars = Vars::new();
//! vars.insert("rootfs_dir".to_string(), "/build/rootfs-1".to_string());
//! assert_eq!(
//!   substitute("mkdir -p $${rootfs_dir}/var/tmp", &vars).unwrap(),
//!   "mkdir -p /build/rootfs-1/var/tmp"
//! );
//! ```

mod store;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::executor::{ExecError, RemoteExecutor, UploadSource};

pub use store::{DirTemplateStore, MemoryTemplateStore, TemplateStore};

/// Variables available to substitution, by name.
pub type Vars = BTreeMap<String, String>;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no references)
  Literal(String),

  /// A `$${name}` reference
  Variable(String),
}

/// Errors that can occur while loading, parsing or rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("unbound template variable: {name}")]
  UnboundVariable { name: String },

  #[error("unclosed variable reference at position {0}")]
  Unclosed(usize),

  #[error("malformed variable reference: {0}")]
  Malformed(String),

  #[error("template not found: {id}")]
  NotFound { id: String },

  #[error("failed to read template {id} from {}: {source}", path.display())]
  Read {
    id: String,
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("template {id} is not valid UTF-8")]
  NotUtf8 { id: String },
}

/// Errors from [`render_and_upload`].
#[derive(Debug, Error)]
pub enum RenderError {
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Exec(#[from] ExecError),
}

/// Parse a string containing `$${name}` references into segments.
///
/// # Errors
///
/// Returns an error if a reference is unclosed or its name is empty or
/// contains characters outside `[A-Za-z0-9_.-]`.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    if !matches!(chars.peek(), Some((_, '$'))) {
      // Lone $, shell variables like $HOME pass through
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if matches!(chars.peek(), Some((_, '{'))) {
          // Escaped: $$${ -> $${
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some((_, '{')) => {
        chars.next();

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(TemplateError::Unclosed(pos));
        }
        validate_name(&name)?;
        segments.push(Segment::Variable(name));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn validate_name(name: &str) -> Result<(), TemplateError> {
  if name.is_empty() {
    return Err(TemplateError::Malformed("empty variable name".to_string()));
  }
  if let Some(bad) = name
    .chars()
    .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
  {
    return Err(TemplateError::Malformed(format!(
      "invalid character '{bad}' in variable name '{name}'"
    )));
  }
  Ok(())
}

/// Substitute all references in a string.
///
/// # Errors
///
/// Returns an error if parsing fails or any referenced variable is missing
/// from `vars`.
pub fn substitute(input: &str, vars: &Vars) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  substitute_segments(&segments, vars)
}

/// Substitute references in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], vars: &Vars) -> Result<String, TemplateError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Variable(name) => {
        let value = vars
          .get(name)
          .ok_or_else(|| TemplateError::UnboundVariable { name: name.clone() })?;
        result.push_str(value);
      }
    }
  }

  Ok(result)
}

/// Describes one templated file to place on the build host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
  /// Logical id resolved by a [`TemplateStore`].
  pub source_id: String,
  /// Destination path on the build host.
  pub destination_path: String,
  /// Template-specific variables, layered over the step variables.
  pub context: Vars,
  /// When false, an existing destination is left untouched.
  pub overwrite_existing: bool,
  /// Keep the previous destination content as `<path>.bak`.
  pub backup: bool,
  /// File mode to set after upload.
  pub mode: Option<u32>,
  /// Upload the source bytes unchanged, without parsing references.
  pub raw: bool,
}

impl TemplateSpec {
  pub fn new(source_id: impl Into<String>, destination_path: impl Into<String>) -> Self {
    Self {
      source_id: source_id.into(),
      destination_path: destination_path.into(),
      context: Vars::new(),
      overwrite_existing: true,
      backup: true,
      mode: None,
      raw: false,
    }
  }

  pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.context.insert(name.into(), value.into());
    self
  }

  pub fn no_backup(mut self) -> Self {
    self.backup = false;
    self
  }

  pub fn keep_existing(mut self) -> Self {
    self.overwrite_existing = false;
    self
  }

  pub fn mode(mut self, mode: u32) -> Self {
    self.mode = Some(mode);
    self
  }

  pub fn raw(mut self) -> Self {
    self.raw = true;
    self
  }

  /// Resolve references in the source id, destination and context values.
  pub fn resolve(&self, vars: &Vars) -> Result<TemplateSpec, TemplateError> {
    let mut context = Vars::new();
    for (key, value) in &self.context {
      context.insert(key.clone(), substitute(value, vars)?);
    }

    Ok(TemplateSpec {
      source_id: substitute(&self.source_id, vars)?,
      destination_path: substitute(&self.destination_path, vars)?,
      context,
      ..self.clone()
    })
  }
}

/// Render `source` with `vars` layered under the template's own context.
fn render_bytes(spec: &TemplateSpec, source: Vec<u8>, vars: &Vars) -> Result<Vec<u8>, TemplateError> {
  if spec.raw {
    return Ok(source);
  }

  let text = String::from_utf8(source).map_err(|_| TemplateError::NotUtf8 {
    id: spec.source_id.clone(),
  })?;

  let mut merged = vars.clone();
  merged.extend(spec.context.iter().map(|(k, v)| (k.clone(), v.clone())));

  Ok(substitute(&text, &merged)?.into_bytes())
}

/// Render a template and upload the result to the build host.
///
/// The source id and destination are resolved against `vars` first. Any template
/// error aborts before the executor is touched.
///
/// Returns `Ok(false)` when the upload was skipped because the destination
/// exists and `overwrite_existing` is false.
pub async fn render_and_upload(
  spec: &TemplateSpec,
  store: &impl TemplateStore,
  vars: &Vars,
  executor: &impl RemoteExecutor,
) -> Result<bool, RenderError> {
  let spec = spec.resolve(vars)?;
  let source = store.load(&spec.source_id)?;
  let rendered = render_bytes(&spec, source, vars)?;

  if !spec.overwrite_existing && executor.path_exists(&spec.destination_path).await? {
    debug!(dest = %spec.destination_path, "destination exists, keeping it");
    return Ok(false);
  }

  info!(template = %spec.source_id, dest = %spec.destination_path, "uploading template");
  executor
    .upload(
      &UploadSource::Bytes(rendered),
      &spec.destination_path,
      spec.mode,
      spec.backup,
    )
    .await?;

  Ok(true)
}
