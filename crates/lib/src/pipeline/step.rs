//! Steps and the actions they perform.
//!
//! A step is plain data. Every string inside it may reference variables with
//! `$${name}`; references are resolved against the step context when the step
//! runs, never when it is built.

use tracing::debug;

use crate::archive::{self, PublishTarget};
use crate::executor::RemoteExecutor;
use crate::template::{self, TemplateSpec, TemplateStore, Vars};

use super::StepContext;
use super::types::StepError;

/// One thing a step does on the build host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  /// Run a shell command, optionally in a working directory.
  Run { command: String, cwd: Option<String> },

  /// Render a template and upload it.
  Upload(TemplateSpec),

  /// Pack `parent_dir/dir_name` into `parent_dir/dir_name.tar.gz`.
  Archive { dir_name: String, parent_dir: String },

  /// Copy an archive to the storage host.
  Publish { archive: String, target: PublishTarget },
}

impl Action {
  /// Human-readable form for plans and logs, references left unresolved.
  pub fn describe(&self) -> String {
    match self {
      Action::Run { command, cwd: None } => command.clone(),
      Action::Run {
        command,
        cwd: Some(cwd),
      } => format!("(in {cwd}) {command}"),
      Action::Upload(spec) => format!("upload {} -> {}", spec.source_id, spec.destination_path),
      Action::Archive { dir_name, parent_dir } => format!("archive {parent_dir}/{dir_name}"),
      Action::Publish { archive, target } => format!("publish {archive} -> {}", target.destination()),
    }
  }
}

/// Condition under which a step has nothing left to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
  PathExists(String),
  CommandSucceeds(String),
}

/// A named, ordered list of actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
  pub name: String,
  pub actions: Vec<Action>,
  /// Evaluated before the actions; when satisfied the step is skipped.
  pub check: Option<Check>,
  /// A failure is recorded but does not stop the pipeline.
  pub best_effort: bool,
}

impl Step {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      actions: Vec::new(),
      check: None,
      best_effort: false,
    }
  }

  pub fn run(mut self, command: impl Into<String>) -> Self {
    self.actions.push(Action::Run {
      command: command.into(),
      cwd: None,
    });
    self
  }

  pub fn run_in(mut self, cwd: impl Into<String>, command: impl Into<String>) -> Self {
    self.actions.push(Action::Run {
      command: command.into(),
      cwd: Some(cwd.into()),
    });
    self
  }

  pub fn upload(mut self, spec: TemplateSpec) -> Self {
    self.actions.push(Action::Upload(spec));
    self
  }

  pub fn archive(mut self, parent_dir: impl Into<String>, dir_name: impl Into<String>) -> Self {
    self.actions.push(Action::Archive {
      dir_name: dir_name.into(),
      parent_dir: parent_dir.into(),
    });
    self
  }

  pub fn publish(mut self, archive: impl Into<String>, target: PublishTarget) -> Self {
    self.actions.push(Action::Publish {
      archive: archive.into(),
      target,
    });
    self
  }

  /// Skip the step when `path` already exists.
  pub fn unless_exists(mut self, path: impl Into<String>) -> Self {
    self.check = Some(Check::PathExists(path.into()));
    self
  }

  /// Skip the step when `command` exits zero.
  pub fn unless_succeeds(mut self, command: impl Into<String>) -> Self {
    self.check = Some(Check::CommandSucceeds(command.into()));
    self
  }

  pub fn best_effort(mut self) -> Self {
    self.best_effort = true;
    self
  }
}

/// Returns true when the check says the step is already done.
pub(crate) async fn evaluate_check<E, S>(check: &Check, ctx: &StepContext<'_, E, S>, vars: &Vars) -> Result<bool, StepError>
where
  E: RemoteExecutor,
  S: TemplateStore,
{
  match check {
    Check::PathExists(path) => {
      let path = template::substitute(path, vars)?;
      Ok(ctx.executor.path_exists(&path).await?)
    }
    Check::CommandSucceeds(command) => {
      let command = template::substitute(command, vars)?;
      Ok(ctx.executor.execute(&command, None).await?.is_success())
    }
  }
}

pub(crate) async fn execute_action<E, S>(action: &Action, ctx: &StepContext<'_, E, S>, vars: &Vars) -> Result<(), StepError>
where
  E: RemoteExecutor,
  S: TemplateStore,
{
  match action {
    Action::Run { command, cwd } => {
      let command = template::substitute(command, vars)?;
      let cwd = cwd.as_deref().map(|c| template::substitute(c, vars)).transpose()?;
      ctx.executor.run(&command, cwd.as_deref()).await?;
    }

    Action::Upload(spec) => {
      let uploaded = template::render_and_upload(spec, ctx.templates, vars, ctx.executor).await?;
      if !uploaded {
        debug!(template = %spec.source_id, "upload skipped");
      }
    }

    Action::Archive { dir_name, parent_dir } => {
      let dir_name = template::substitute(dir_name, vars)?;
      let parent_dir = template::substitute(parent_dir, vars)?;
      archive::archive(&dir_name, &parent_dir, ctx.executor).await?;
    }

    Action::Publish { archive, target } => {
      let archive = template::substitute(archive, vars)?;
      archive::publish(&archive, target, ctx.executor).await?;
    }
  }

  Ok(())
}
