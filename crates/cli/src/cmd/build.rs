//! Implementation of the `pibake build` command.
//!
//! Runs the image pipeline in a new build session, prints one line per step
//! and optionally writes the JSON report next to the caller.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use pibake_lib::executor::RemoteExecutor;
use pibake_lib::library::image_pipeline;
use pibake_lib::pipeline::{PipelineReport, PipelineStatus, StepContext};
use pibake_lib::session::BuildSession;

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_step, print_success, print_warning};

#[derive(Debug, Default)]
pub struct BuildOptions {
  pub config: Option<PathBuf>,
  /// Reuse this session id instead of the current time.
  pub id: Option<String>,
  /// Appended to the time-based id.
  pub suffix: Option<String>,
  pub no_publish: bool,
  pub local: bool,
  pub retry_backoff: Option<Duration>,
  pub report: Option<PathBuf>,
  pub output: OutputFormat,
}

/// Execute the build command.
///
/// Fails when the pipeline aborted or was cancelled. A tolerated failure of a
/// best-effort step only produces a warning.
pub fn cmd_build(opts: BuildOptions) -> Result<()> {
  let mut config = super::load_config(opts.config.as_deref())?;
  if let Some(backoff) = opts.retry_backoff {
    config.retry.backoff_ms = backoff.as_millis() as u64;
  }

  let session = match (&opts.id, &opts.suffix) {
    (Some(id), _) => BuildSession::with_id(&config.layout, id.as_str()),
    (None, Some(suffix)) => BuildSession::with_disambiguator(&config.layout, suffix),
    (None, None) => BuildSession::new(&config.layout),
  };
  let publish = if opts.no_publish { None } else { config.publish.as_ref() };
  let pipeline = image_pipeline(&config.image, publish);

  let executor = config.executor(opts.local);
  let store = config.template_store();
  let ctx = StepContext::new(&executor, &store, &session).with_vars(config.vars());

  info!(
    session = %session.id(),
    host = %executor.describe(),
    steps = pipeline.len(),
    "starting build"
  );
  if !opts.output.is_json() {
    print_info(&format!("Building {} on {}", session.id(), executor.describe()));
  }

  let report = super::run_pipeline(&pipeline, &ctx)?;

  if let Some(path) = &opts.report {
    let json = serde_json::to_string_pretty(&report.summary()).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
    info!(path = %path.display(), "report written");
  }

  if opts.output.is_json() {
    print_json(&report.summary())?;
  } else {
    print_report(&report);
  }

  match report.status() {
    PipelineStatus::Completed => {
      if !opts.output.is_json() {
        print_success(&format!("Build {} complete", session.id()));
        print_stat("Rootfs", &session.rootfs_archive());
        print_stat("Bootfs", &session.bootfs_archive());
        if let Some(target) = publish {
          print_stat("Published to", &target.destination());
        }
        if executor.retries() > 0 {
          print_stat("Reconnects", &executor.retries().to_string());
        }
      }
      Ok(())
    }
    PipelineStatus::Cancelled => bail!("Build {} cancelled", session.id()),
    PipelineStatus::Aborted => match &report.failed {
      Some((step, err)) => bail!("Build {} failed at step {}: {}", session.id(), step, err),
      None => bail!("Build {} failed", session.id()),
    },
    status => bail!("Build {} stopped in state {:?}", session.id(), status),
  }
}

fn print_report(report: &PipelineReport) {
  for record in &report.steps {
    print_step(record);
  }
  println!();
  for record in report.best_effort_failures() {
    print_warning(&format!(
      "{} failed and was ignored: {}",
      record.name,
      record.error.as_deref().unwrap_or("unknown error")
    ));
  }
}
