//! Implementation of the `pibake paths` command.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use pibake_lib::session::BuildSession;

use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Debug, Serialize)]
struct SessionPaths<'a> {
  id: &'a str,
  root_dir: &'a str,
  rootfs_dir: &'a str,
  bootfs_dir: &'a str,
  rootfs_archive: String,
  bootfs_archive: String,
}

/// Print where a build session lives on the build host.
pub fn cmd_paths(config: Option<&Path>, id: Option<&str>, output: OutputFormat) -> Result<()> {
  let config = super::load_config(config)?;
  let session = match id {
    Some(id) => BuildSession::with_id(&config.layout, id),
    None => BuildSession::new(&config.layout),
  };

  let paths = SessionPaths {
    id: session.id(),
    root_dir: session.root_dir(),
    rootfs_dir: session.rootfs_dir(),
    bootfs_dir: session.bootfs_dir(),
    rootfs_archive: session.rootfs_archive(),
    bootfs_archive: session.bootfs_archive(),
  };

  if output.is_json() {
    return print_json(&paths);
  }

  println!("Session: {}", paths.id);
  print_stat("Build dir", paths.root_dir);
  print_stat("Rootfs", paths.rootfs_dir);
  print_stat("Bootfs", paths.bootfs_dir);
  print_stat("Rootfs archive", &paths.rootfs_archive);
  print_stat("Bootfs archive", &paths.bootfs_archive);
  Ok(())
}
