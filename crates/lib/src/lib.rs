//! pibake-lib: Core types and logic for pibake
//!
//! This crate provides the pieces used to build a Raspberry Pi Debian image
//! on a remote build host:
//! - `executor`: run commands and upload files on the build host
//! - `template`: `$${var}` substitution and template uploads
//! - `pipeline`: ordered, idempotent steps with a per-step report
//! - `session`: the build id and its directory layout
//! - `archive`: packaging and shipping the produced trees
//! - `library`: the image recipe as selectable step sets
//! - `config`: the TOML configuration everything above is driven by

pub mod archive;
pub mod config;
pub mod consts;
pub mod executor;
pub mod library;
pub mod pipeline;
pub mod session;
pub mod template;
#[cfg(test)]
mod util;
