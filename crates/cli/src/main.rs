mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::BuildOptions;
use output::{OutputFormat, print_error};

/// pibake - Raspberry Pi image builder
#[derive(Parser)]
#[command(name = "pibake")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build and archive a rootfs and bootfs
  Build {
    /// Configuration file (default: $PIBAKE_CONFIG or ./pibake.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reuse an existing session id instead of the current time
    #[arg(long, conflicts_with = "suffix")]
    id: Option<String>,

    /// Suffix appended to the time-based session id
    #[arg(long)]
    suffix: Option<String>,

    /// Keep the archives on the build host
    #[arg(long)]
    no_publish: bool,

    /// Run on this machine instead of over SSH
    #[arg(long)]
    local: bool,

    /// Initial delay before reconnecting after a dropped connection
    #[arg(long, value_parser = humantime::parse_duration)]
    retry_backoff: Option<Duration>,

    /// Write the JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List the steps a build would run
  Plan {
    /// Configuration file (default: $PIBAKE_CONFIG or ./pibake.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Leave out the publish steps
    #[arg(long)]
    no_publish: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Install bootstrap tooling on the build host
  PrepareHost {
    /// Configuration file (default: $PIBAKE_CONFIG or ./pibake.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run on this machine instead of over SSH
    #[arg(long)]
    local: bool,
  },

  /// Show the directories and archives of a build session
  Paths {
    /// Configuration file (default: $PIBAKE_CONFIG or ./pibake.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session id (default: the current time)
    #[arg(long)]
    id: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<()> {
  match cli.command {
    Commands::Build {
      config,
      id,
      suffix,
      no_publish,
      local,
      retry_backoff,
      report,
      output,
    } => cmd::cmd_build(BuildOptions {
      config,
      id,
      suffix,
      no_publish,
      local,
      retry_backoff,
      report,
      output,
    }),
    Commands::Plan {
      config,
      no_publish,
      output,
    } => cmd::cmd_plan(config.as_deref(), no_publish, cli.verbose, output),
    Commands::PrepareHost { config, local } => cmd::cmd_prepare_host(config.as_deref(), local),
    Commands::Paths { config, id, output } => cmd::cmd_paths(config.as_deref(), id.as_deref(), output),
  }
}
