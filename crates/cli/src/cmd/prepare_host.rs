//! Implementation of the `pibake prepare-host` command.

use std::path::Path;

use anyhow::{Result, bail};

use pibake_lib::executor::RemoteExecutor;
use pibake_lib::library::host_pipeline;
use pibake_lib::pipeline::StepContext;
use pibake_lib::session::BuildSession;

use crate::output::{print_info, print_step, print_success};

/// Install the bootstrap tooling on the build host.
pub fn cmd_prepare_host(config: Option<&Path>, local: bool) -> Result<()> {
  let config = super::load_config(config)?;
  let session = BuildSession::new(&config.layout);
  let executor = config.executor(local);
  let store = config.template_store();
  let ctx = StepContext::new(&executor, &store, &session).with_vars(config.vars());

  print_info(&format!("Preparing {}", executor.describe()));
  let report = super::run_pipeline(&host_pipeline(), &ctx)?;
  for record in &report.steps {
    print_step(record);
  }

  if let Some((step, err)) = &report.failed {
    bail!("Host preparation failed at step {}: {}", step, err);
  }
  if !report.is_success() {
    bail!("Host preparation cancelled");
  }
  print_success(&format!("{} is ready", executor.describe()));
  Ok(())
}
