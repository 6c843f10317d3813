//! Types for pipeline execution.
//!
//! This module defines the step error type, the step and pipeline states, and
//! the report returned by [`Pipeline::run`](super::Pipeline::run).

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::archive::{ArchiveError, PublishError};
use crate::executor::ExecError;
use crate::template::{RenderError, TemplateError};

/// Errors that fail a step.
#[derive(Debug, Error)]
pub enum StepError {
  /// A command failed or the host could not be reached.
  #[error(transparent)]
  Exec(#[from] ExecError),

  /// A template or a reference in the step could not be resolved.
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Publish(#[from] PublishError),
}

impl From<RenderError> for StepError {
  fn from(err: RenderError) -> Self {
    match err {
      RenderError::Template(e) => StepError::Template(e),
      RenderError::Exec(e) => StepError::Exec(e),
    }
  }
}

impl StepError {
  /// The executor error underneath, if any.
  pub fn exec_error(&self) -> Option<&ExecError> {
    match self {
      StepError::Exec(e) => Some(e),
      StepError::Archive(e) => e.exec_error(),
      StepError::Publish(e) => e.exec_error(),
      StepError::Template(_) => None,
    }
  }

  /// True when the build host, not the step, was the problem.
  pub fn is_connection_failure(&self) -> bool {
    matches!(
      self.exec_error(),
      Some(ExecError::ConnectionLost { .. } | ExecError::RetriesExhausted { .. })
    )
  }
}

/// State of one step.
///
/// `Pending -> {Skipped | Running -> {Succeeded | Failed}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  /// The step's check was already satisfied.
  Skipped,
  Running,
  Succeeded,
  Failed,
}

impl StepStatus {
  /// The step will not change state again.
  pub fn is_finished(self) -> bool {
    matches!(self, StepStatus::Skipped | StepStatus::Succeeded | StepStatus::Failed)
  }
}

/// State of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
  NotStarted,
  Running,
  /// Every step finished; best-effort failures allowed.
  Completed,
  /// A step that is not best-effort failed.
  Aborted,
  /// Stopped between steps on request.
  Cancelled,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
  pub name: String,
  pub status: StepStatus,
  pub best_effort: bool,
  /// Wall time spent in the check and actions.
  #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
  pub duration: Option<Duration>,
  /// Rendered error message when the step failed.
  pub error: Option<String>,
}

impl StepRecord {
  pub fn pending(name: impl Into<String>, best_effort: bool) -> Self {
    Self {
      name: name.into(),
      status: StepStatus::Pending,
      best_effort,
      duration: None,
      error: None,
    }
  }
}

fn serialize_millis<S: serde::Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
  match duration {
    Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
    None => serializer.serialize_none(),
  }
}

/// Result of running a pipeline.
#[derive(Debug)]
pub struct PipelineReport {
  /// Id of the build session the pipeline ran in.
  pub session_id: String,

  /// One record per step, in declaration order.
  pub steps: Vec<StepRecord>,

  /// The step that aborted the run (at most one, stops execution).
  pub failed: Option<(String, StepError)>,

  /// The run stopped because cancellation was requested.
  pub cancelled: bool,
}

impl PipelineReport {
  pub(crate) fn new(session_id: impl Into<String>, steps: Vec<StepRecord>) -> Self {
    Self {
      session_id: session_id.into(),
      steps,
      failed: None,
      cancelled: false,
    }
  }

  pub fn status(&self) -> PipelineStatus {
    if self.failed.is_some() {
      return PipelineStatus::Aborted;
    }
    if self.cancelled {
      return PipelineStatus::Cancelled;
    }
    if self.steps.iter().all(|s| s.status.is_finished()) {
      return PipelineStatus::Completed;
    }
    if self.steps.iter().all(|s| s.status == StepStatus::Pending) {
      return PipelineStatus::NotStarted;
    }
    PipelineStatus::Running
  }

  /// Returns true if the pipeline completed, best-effort failures included.
  pub fn is_success(&self) -> bool {
    self.status() == PipelineStatus::Completed
  }

  pub fn step(&self, name: &str) -> Option<&StepRecord> {
    self.steps.iter().find(|s| s.name == name)
  }

  fn names_with(&self, status: StepStatus) -> Vec<&str> {
    self
      .steps
      .iter()
      .filter(|s| s.status == status)
      .map(|s| s.name.as_str())
      .collect()
  }

  pub fn succeeded(&self) -> Vec<&str> {
    self.names_with(StepStatus::Succeeded)
  }

  pub fn skipped(&self) -> Vec<&str> {
    self.names_with(StepStatus::Skipped)
  }

  /// Steps never reached.
  pub fn pending(&self) -> Vec<&str> {
    self.names_with(StepStatus::Pending)
  }

  /// Failed steps the run tolerated.
  pub fn best_effort_failures(&self) -> Vec<&StepRecord> {
    self
      .steps
      .iter()
      .filter(|s| s.best_effort && s.status == StepStatus::Failed)
      .collect()
  }

  /// Serializable summary, suitable for writing next to the build.
  pub fn summary(&self) -> ReportSummary<'_> {
    ReportSummary {
      session_id: &self.session_id,
      status: self.status(),
      failed_step: self.failed.as_ref().map(|(name, _)| name.as_str()),
      steps: &self.steps,
    }
  }
}

/// JSON form of a [`PipelineReport`].
#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
  pub session_id: &'a str,
  pub status: PipelineStatus,
  pub failed_step: Option<&'a str>,
  pub steps: &'a [StepRecord],
}
