//! Build configuration.
//!
//! One TOML file describes the build host, where builds live, which image to
//! produce and where to ship it. Every section is optional; missing values
//! take the defaults of the original IoT-LAB gateway image.
//!
//! Paths read on the machine running pibake (`templates.dir`,
//! `templates.mounts`, `parts.keys_dir`, `target.identity_file`) are resolved
//! against the directory holding the configuration file. Paths on the build
//! host (`layout.build_dir` and the other `parts`) are used as written.
//!
//! ```toml
//! [target]
//! host = "buildhost"
//! user = "root"
//!
//! [layout]
//! build_dir = "/srv/ibat-rpi-image/build"
//!
//! [image]
//! boot = "kernel"
//! gateway = false
//!
//! [publish]
//! host = "srvnfs.ibat.iot-lab.info"
//! user = "root"
//! dir = "/iotlab/images/custom_gateway_images_all"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::archive::PublishTarget;
use crate::executor::{Auth, HostExecutor, LocalExecutor, RemoteTarget, RetryPolicy, RetryingExecutor, SshExecutor};
use crate::session::BuildLayout;
use crate::template::{DirTemplateStore, Vars};

/// Mount name under which host keys and admin keys are looked up.
pub const KEYS_MOUNT: &str = "keys";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PIBAKE_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "pibake.toml";

/// `$PIBAKE_CONFIG` if set and not empty, else `pibake.toml` in the current
/// directory.
pub fn default_config_path() -> PathBuf {
  std::env::var_os(CONFIG_ENV)
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Read { path: PathBuf, source: std::io::Error },

  #[error("failed to parse config {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// The build host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
  pub host: String,
  pub user: String,
  pub port: Option<u16>,
  pub identity_file: Option<PathBuf>,
  /// Run commands on this machine instead of over SSH.
  pub local: bool,
}

impl Default for TargetConfig {
  fn default() -> Self {
    Self {
      host: "localhost".to_string(),
      user: "root".to_string(),
      port: None,
      identity_file: None,
      local: false,
    }
  }
}

/// Checkouts the image is assembled from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartsConfig {
  /// Raspberry Pi firmware checkout, on the build host.
  pub firmware_dir: String,
  /// Firmware with u-boot, on the build host.
  pub firmware_noob_dir: String,
  /// Host and admin keys, read locally. Its `template/` directory is
  /// mounted as `keys/`.
  pub keys_dir: PathBuf,
  /// IoT-LAB gateway checkout, on the build host.
  pub gateway_dir: String,
}

impl Default for PartsConfig {
  fn default() -> Self {
    Self {
      firmware_dir: "parts/firmware".to_string(),
      firmware_noob_dir: "parts/ibat-firmware-noob".to_string(),
      keys_dir: PathBuf::from("parts/ibat-keys"),
      gateway_dir: "parts/iot-lab-gateway".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatesConfig {
  pub dir: PathBuf,
  /// Extra template roots by id prefix.
  pub mounts: BTreeMap<String, PathBuf>,
}

impl Default for TemplatesConfig {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("template"),
      mounts: BTreeMap::new(),
    }
  }
}

/// How the Pi boots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
  /// Firmware loads the kernel directly.
  Kernel,
  /// Firmware chains to u-boot.
  #[default]
  Uboot,
}

/// What goes into the image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
  pub suite: String,
  pub arch: String,
  pub bootstrap_mirror: String,
  /// Lines of `/etc/apt/sources.list`.
  pub apt_sources: Vec<String>,
  /// URLs of repository keys to import.
  pub apt_keys: Vec<String>,
  pub boot: BootMode,
  pub packages: Vec<String>,
  pub timezone: String,
  pub oml2: bool,
  pub gateway: bool,
  pub lldp: bool,
  /// Default locale, e.g. `fr_FR.UTF-8`. Locale and keyboard are left alone
  /// when unset.
  pub locale: Option<String>,
}

impl Default for ImageConfig {
  fn default() -> Self {
    Self {
      suite: "jessie".to_string(),
      arch: "armhf".to_string(),
      bootstrap_mirror: "http://archive.raspbian.com/raspbian".to_string(),
      apt_sources: vec![
        "deb http://mirrordirector.raspbian.org/raspbian/ jessie main contrib non-free rpi".to_string(),
        "deb http://archive.raspberrypi.org/debian/ jessie main".to_string(),
      ],
      apt_keys: vec!["http://archive.raspberrypi.org/debian/raspberrypi.gpg.key".to_string()],
      boot: BootMode::default(),
      packages: [
        "nfs-common",
        "ntp",
        "vim",
        "git",
        "build-essential",
        "screen",
        "curl",
        "telnet",
        "usbutils",
        "byobu",
        "gcc-avr",
        "wiringpi",
        "i2c-tools",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      timezone: "Europe/Paris".to_string(),
      oml2: true,
      gateway: true,
      lldp: true,
      locale: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
  /// Total attempts per call, including the first.
  pub attempts: u32,
  pub backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      attempts: 3,
      backoff_ms: 2000,
    }
  }
}

impl RetryConfig {
  /// The cap on the doubling delay never falls below the configured initial
  /// delay, so a long `backoff_ms` is honored as given.
  pub fn policy(&self) -> RetryPolicy {
    let initial_backoff = Duration::from_millis(self.backoff_ms);
    RetryPolicy {
      max_attempts: self.attempts,
      initial_backoff,
      max_backoff: RetryPolicy::default().max_backoff.max(initial_backoff),
    }
  }
}

/// Complete build configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub target: TargetConfig,
  pub layout: BuildLayout,
  pub parts: PartsConfig,
  pub templates: TemplatesConfig,
  pub image: ImageConfig,
  /// Storage host for the archives. Nothing is published when unset.
  pub publish: Option<PublishTarget>,
  pub retry: RetryConfig,
  /// Extra variables for templates and step commands.
  pub vars: BTreeMap<String, String>,
}

impl Config {
  /// Load and validate the configuration at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let canonical = dunce::canonicalize(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let base_dir = canonical.parent().unwrap_or(Path::new("/"));

    let config = Self::parse(&content, base_dir).map_err(|e| match e {
      ConfigError::Parse { source, .. } => ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      },
      other => other,
    })?;

    debug!(path = %canonical.display(), "loaded config");
    Ok(config)
  }

  /// Parse and validate `content`, resolving local paths against `base_dir`.
  pub fn parse(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
    let mut config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: PathBuf::new(),
      source: Box::new(source),
    })?;
    config.resolve_paths(base_dir);
    config.validate()?;
    Ok(config)
  }

  fn resolve_paths(&mut self, base_dir: &Path) {
    self.templates.dir = base_dir.join(&self.templates.dir);
    for dir in self.templates.mounts.values_mut() {
      *dir = base_dir.join(&*dir);
    }
    self.parts.keys_dir = base_dir.join(&self.parts.keys_dir);
    if let Some(identity) = self.target.identity_file.as_mut() {
      *identity = base_dir.join(&*identity);
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    let required = [
      ("target.host", &self.target.host),
      ("target.user", &self.target.user),
      ("layout.build_prefix", &self.layout.build_prefix),
      ("image.suite", &self.image.suite),
      ("image.arch", &self.image.arch),
      ("image.bootstrap_mirror", &self.image.bootstrap_mirror),
      ("image.timezone", &self.image.timezone),
      ("parts.firmware_dir", &self.parts.firmware_dir),
    ];
    for (key, value) in required {
      if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{key} must not be empty")));
      }
    }

    if self.layout.build_prefix.contains('/') {
      return Err(ConfigError::Invalid("layout.build_prefix must not contain '/'".to_string()));
    }
    if self.image.apt_sources.is_empty() {
      return Err(ConfigError::Invalid("image.apt_sources must list at least one source".to_string()));
    }
    if self.image.boot == BootMode::Uboot && self.parts.firmware_noob_dir.trim().is_empty() {
      return Err(ConfigError::Invalid(
        "parts.firmware_noob_dir is required for u-boot images".to_string(),
      ));
    }
    if self.image.gateway && self.parts.gateway_dir.trim().is_empty() {
      return Err(ConfigError::Invalid(
        "parts.gateway_dir is required when image.gateway is set".to_string(),
      ));
    }
    if self.retry.attempts == 0 {
      return Err(ConfigError::Invalid("retry.attempts must be at least 1".to_string()));
    }
    if let Some(publish) = &self.publish {
      if publish.host.is_empty() || publish.user.is_empty() || publish.dir.is_empty() {
        return Err(ConfigError::Invalid("publish needs host, user and dir".to_string()));
      }
    }
    if self.templates.mounts.contains_key(KEYS_MOUNT) {
      return Err(ConfigError::Invalid(format!(
        "templates.mounts.{KEYS_MOUNT} is reserved for parts.keys_dir"
      )));
    }
    Ok(())
  }

  pub fn remote_target(&self) -> RemoteTarget {
    RemoteTarget {
      host: self.target.host.clone(),
      user: self.target.user.clone(),
      port: self.target.port,
      auth: match &self.target.identity_file {
        Some(path) => Auth::IdentityFile(path.clone()),
        None => Auth::Agent,
      },
    }
  }

  /// Executor for the build host, wrapped in the configured retry policy.
  ///
  /// `force_local` overrides `target.local`.
  pub fn executor(&self, force_local: bool) -> RetryingExecutor<HostExecutor> {
    let inner = if force_local || self.target.local {
      HostExecutor::Local(LocalExecutor::new())
    } else {
      HostExecutor::Ssh(SshExecutor::new(self.remote_target()))
    };
    RetryingExecutor::new(inner, self.retry.policy())
  }

  pub fn template_store(&self) -> DirTemplateStore {
    let store = DirTemplateStore::new(&self.templates.dir).mount(KEYS_MOUNT, self.parts.keys_dir.join("template"));
    self
      .templates
      .mounts
      .iter()
      .fold(store, |store, (name, dir)| store.mount(name, dir))
  }

  /// Variables the configuration contributes to step commands and templates.
  ///
  /// Entries from `[vars]` come first, so built-in names win on a clash.
  pub fn vars(&self) -> Vars {
    let mut vars = self.vars.clone();
    let image = &self.image;
    vars.extend(
      [
        ("suite", image.suite.as_str()),
        ("arch", image.arch.as_str()),
        ("bootstrap_mirror", image.bootstrap_mirror.as_str()),
        ("timezone", image.timezone.as_str()),
        ("firmware_dir", self.parts.firmware_dir.as_str()),
        ("firmware_noob_dir", self.parts.firmware_noob_dir.as_str()),
        ("gateway_dir", self.parts.gateway_dir.as_str()),
      ]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v.to_string())),
    );
    if let Some(locale) = &image.locale {
      vars.insert("locale".to_string(), locale.clone());
    }
    vars
  }
}
