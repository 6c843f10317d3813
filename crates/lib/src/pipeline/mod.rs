//! Ordered execution of build steps.
//!
//! A [`Pipeline`] runs its steps one after another, in declaration order.
//! Each step may carry a [`Check`]; when the check is already satisfied the
//! step is skipped, which lets an interrupted build be re-run against the same
//! session. The first failing step aborts the run unless it is marked
//! best-effort, in which case the failure is recorded and the run continues.
//!
//! The pipeline never retries a step. Reconnecting after a dropped connection
//! is the executor's business (see [`RetryingExecutor`](crate::executor::RetryingExecutor)).

mod cancel;
mod step;
mod types;

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::executor::RemoteExecutor;
use crate::session::BuildSession;
use crate::template::{TemplateStore, Vars};

pub use cancel::{CancelHandle, CancelSignal};
pub use step::{Action, Check, Step};
pub use types::{PipelineReport, PipelineStatus, ReportSummary, StepError, StepRecord, StepStatus};

/// Everything a running step can use.
pub struct StepContext<'a, E, S> {
  pub executor: &'a E,
  pub templates: &'a S,
  pub session: &'a BuildSession,
  /// Extra variables, e.g. from configuration. Session variables take
  /// precedence on a name clash.
  pub vars: Vars,
}

impl<'a, E: RemoteExecutor, S: TemplateStore> StepContext<'a, E, S> {
  pub fn new(executor: &'a E, templates: &'a S, session: &'a BuildSession) -> Self {
    Self {
      executor,
      templates,
      session,
      vars: Vars::new(),
    }
  }

  pub fn with_vars(mut self, vars: Vars) -> Self {
    self.vars.extend(vars);
    self
  }

  /// Variables visible to step strings.
  pub fn resolved_vars(&self) -> Vars {
    let mut vars = self.vars.clone();
    vars.extend(self.session.vars());
    vars
  }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
  steps: Vec<Step>,
}

impl Pipeline {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn step(mut self, step: Step) -> Self {
    self.steps.push(step);
    self
  }

  pub fn push(&mut self, step: Step) {
    self.steps.push(step);
  }

  pub fn extend(&mut self, steps: impl IntoIterator<Item = Step>) {
    self.steps.extend(steps);
  }

  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Run every step in order.
  ///
  /// Always returns a report; the error that aborted the run, if any, is in
  /// [`PipelineReport::failed`].
  pub async fn run<E, S>(&self, ctx: &StepContext<'_, E, S>, cancel: &CancelSignal) -> PipelineReport
  where
    E: RemoteExecutor,
    S: TemplateStore,
  {
    let records = self
      .steps
      .iter()
      .map(|s| StepRecord::pending(&s.name, s.best_effort))
      .collect();
    let mut report = PipelineReport::new(ctx.session.id(), records);
    let vars = ctx.resolved_vars();
    let total = self.steps.len();

    info!(session = %ctx.session.id(), target = %ctx.executor.describe(), steps = total, "starting pipeline");

    for (index, step) in self.steps.iter().enumerate() {
      if cancel.is_cancelled() {
        warn!(step = %step.name, "cancelled before step");
        report.cancelled = true;
        break;
      }

      let start = Instant::now();
      let outcome = run_step(step, ctx, &vars, &mut report.steps[index], index + 1, total).await;
      let record = &mut report.steps[index];
      record.duration = Some(start.elapsed());

      match outcome {
        Ok(status) => transition(record, status),
        Err(err) => {
          transition(record, StepStatus::Failed);
          record.error = Some(err.to_string());

          if step.best_effort {
            warn!(step = %step.name, error = %err, "best-effort step failed, continuing");
            continue;
          }

          error!(step = %step.name, error = %err, "step failed, aborting pipeline");
          report.failed = Some((step.name.clone(), err));
          break;
        }
      }
    }

    info!(session = %report.session_id, status = ?report.status(), "pipeline finished");
    report
  }
}

fn transition(record: &mut StepRecord, status: StepStatus) {
  debug!(step = %record.name, from = ?record.status, to = ?status, "step state");
  record.status = status;
}

/// Run one step. The record only becomes `Running` once the check has
/// decided the actions are needed.
async fn run_step<E, S>(
  step: &Step,
  ctx: &StepContext<'_, E, S>,
  vars: &Vars,
  record: &mut StepRecord,
  position: usize,
  total: usize,
) -> Result<StepStatus, StepError>
where
  E: RemoteExecutor,
  S: TemplateStore,
{
  if let Some(check) = &step.check {
    if step::evaluate_check(check, ctx, vars).await? {
      info!(step = %step.name, "already done, skipping");
      return Ok(StepStatus::Skipped);
    }
  }

  transition(record, StepStatus::Running);
  info!(step = %step.name, position, total, "running step");
  for action in &step.actions {
    step::execute_action(action, ctx, vars).await?;
  }
  Ok(StepStatus::Succeeded)
}
