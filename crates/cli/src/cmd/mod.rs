mod build;
mod paths;
mod plan;
mod prepare_host;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use pibake_lib::config::{Config, default_config_path};
use pibake_lib::executor::RemoteExecutor;
use pibake_lib::pipeline::{CancelSignal, Pipeline, PipelineReport, StepContext};
use pibake_lib::template::TemplateStore;

pub use build::{BuildOptions, cmd_build};
pub use paths::cmd_paths;
pub use plan::cmd_plan;
pub use prepare_host::cmd_prepare_host;

/// Load the configuration from `path`, or from the default location.
fn load_config(path: Option<&Path>) -> Result<Config> {
  let path: PathBuf = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
  debug!(path = %path.display(), "loading configuration");
  Config::load(&path).with_context(|| format!("Failed to load config: {}", path.display()))
}

/// Run `pipeline` to completion on a fresh runtime.
///
/// Ctrl-C cancels the run once the current step has finished.
fn run_pipeline<E, S>(pipeline: &Pipeline, ctx: &StepContext<'_, E, S>) -> Result<PipelineReport>
where
  E: RemoteExecutor,
  S: TemplateStore,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let (handle, signal) = CancelSignal::channel();
    let interrupt = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, stopping after the current step");
        handle.cancel();
      }
    });
    let report = pipeline.run(ctx, &signal).await;
    interrupt.abort();
    report
  });
  Ok(report)
}
