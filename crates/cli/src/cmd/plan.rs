//! Implementation of the `pibake plan` command.
//!
//! Lists the steps a build would run with the current configuration, without
//! touching the build host.

use std::path::Path;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use pibake_lib::library::image_pipeline;
use pibake_lib::pipeline::{Check, Step};

use crate::output::{OutputFormat, print_json, symbols};

#[derive(Debug, Serialize)]
struct PlannedStep<'a> {
  name: &'a str,
  best_effort: bool,
  skip_if: Option<String>,
  actions: Vec<String>,
}

impl<'a> From<&'a Step> for PlannedStep<'a> {
  fn from(step: &'a Step) -> Self {
    Self {
      name: &step.name,
      best_effort: step.best_effort,
      skip_if: step.check.as_ref().map(describe_check),
      actions: step.actions.iter().map(|a| a.describe()).collect(),
    }
  }
}

fn describe_check(check: &Check) -> String {
  match check {
    Check::PathExists(path) => format!("exists {path}"),
    Check::CommandSucceeds(command) => format!("succeeds {command}"),
  }
}

pub fn cmd_plan(config: Option<&Path>, no_publish: bool, verbose: bool, output: OutputFormat) -> Result<()> {
  let config = super::load_config(config)?;
  let publish = if no_publish { None } else { config.publish.as_ref() };
  let pipeline = image_pipeline(&config.image, publish);
  let planned: Vec<PlannedStep> = pipeline.steps().iter().map(PlannedStep::from).collect();

  if output.is_json() {
    return print_json(&planned);
  }

  println!("Steps: {}", planned.len());
  for (index, step) in planned.iter().enumerate() {
    let marker = if step.best_effort { " (best effort)" } else { "" };
    println!("{:>3}. {}{}", index + 1, step.name, marker);
    if verbose {
      if let Some(check) = &step.skip_if {
        println!("       skip if {}", check.if_supports_color(Stream::Stdout, |s| s.dimmed()));
      }
      for action in &step.actions {
        println!(
          "       {} {}",
          symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
          action
        );
      }
    }
  }
  Ok(())
}
