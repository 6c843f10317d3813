//! The Raspberry Pi image recipe.
//!
//! Builds the [`Pipeline`]s pibake runs. The image variants (boot mode,
//! optional components) are chosen from the configuration when the pipeline
//! is assembled; the steps themselves only reference variables and are
//! resolved when they run.
//!
//! Variables used by the steps:
//!
//! | name | source |
//! |------|--------|
//! | `id`, `root_dir`, `rootfs_dir`, `bootfs_dir`, `rootfs_name`, `bootfs_name` | build session |
//! | `suite`, `arch`, `bootstrap_mirror`, `timezone`, `locale` | `[image]` |
//! | `firmware_dir`, `firmware_noob_dir`, `gateway_dir` | `[parts]` |

mod bootfs;
mod packages;
mod rootfs;

use crate::archive::PublishTarget;
use crate::config::ImageConfig;
use crate::pipeline::{Pipeline, Step};

pub use bootfs::bootfs_steps;
pub use packages::{gateway_steps, lldp_step, oml2_steps, package_steps, ssh_steps};
pub use rootfs::{archive_step, base_config_steps, bootstrap_steps, locale_step, ntp_step, system_steps};

const HOST_PACKAGES: &str = "qemu-user-static binfmt-support fakeroot debootstrap git";

/// Prepare the build host for foreign-architecture bootstraps.
pub fn host_pipeline() -> Pipeline {
  Pipeline::new()
    .step(
      Step::new("host/packages")
        .unless_succeeds(format!("dpkg -s {HOST_PACKAGES}"))
        .run(format!("aptitude install -y {HOST_PACKAGES}")),
    )
    .step(Step::new("host/qemu-binfmt").run(
      "echo 'EXTRA_OPTS=\"-L/usr/lib/arm-linux-gnueabihf\"' > /etc/qemu-binfmt.conf",
    ))
}

/// Build the rootfs and bootfs, archive both, optionally publish them.
pub fn image_pipeline(image: &ImageConfig, publish: Option<&PublishTarget>) -> Pipeline {
  let mut pipeline = Pipeline::new();

  pipeline.extend(bootstrap_steps());
  pipeline.extend(base_config_steps(image));
  pipeline.extend(system_steps());
  pipeline.extend(package_steps(image));
  pipeline.extend(ssh_steps());
  if image.oml2 {
    pipeline.extend(oml2_steps());
  }
  if image.gateway {
    pipeline.extend(gateway_steps());
  }
  if image.lldp {
    pipeline.push(lldp_step());
  }
  pipeline.push(ntp_step());
  if image.locale.is_some() {
    pipeline.push(locale_step());
  }
  pipeline.push(archive_step());

  pipeline.extend(bootfs_steps(image.boot));

  if let Some(target) = publish {
    pipeline.push(Step::new("publish/rootfs").publish("$${rootfs_dir}.tar.gz", target.clone()));
    pipeline.push(Step::new("publish/bootfs").publish("$${bootfs_dir}.tar.gz", target.clone()));
  }

  pipeline
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{BootMode, Config};
  use crate::pipeline::{Action, CancelSignal, PipelineStatus, StepContext, StepStatus};
  use crate::session::{BuildLayout, BuildSession};
  use crate::template::MemoryTemplateStore;
  use crate::util::testutil::StubExecutor;

  fn names(pipeline: &Pipeline) -> Vec<&str> {
    pipeline.steps().iter().map(|s| s.name.as_str()).collect()
  }

  fn storage() -> PublishTarget {
    PublishTarget {
      host: "srvnfs.ibat.iot-lab.info".to_string(),
      user: "root".to_string(),
      dir: "/iotlab/images/custom_gateway_images_all".to_string(),
    }
  }

  // ==========================================================================
  // Step selection
  // ==========================================================================

  #[test]
  fn gateway_adds_exactly_one_best_effort_step() {
    let pipeline = image_pipeline(&ImageConfig::default(), None);
    let best_effort: Vec<_> = pipeline.steps().iter().filter(|s| s.best_effort).collect();

    assert_eq!(best_effort.len(), 1);
    assert_eq!(best_effort[0].name, "gateway/compile");
  }

  #[test]
  fn no_gateway_no_best_effort_step() {
    let image = ImageConfig {
      gateway: false,
      ..ImageConfig::default()
    };
    let pipeline = image_pipeline(&image, None);

    assert!(!pipeline.steps().iter().any(|s| s.best_effort));
    assert!(!names(&pipeline).iter().any(|n| n.starts_with("gateway/")));
  }

  #[test]
  fn boot_mode_selects_bootfs_variant() {
    let kernel = image_pipeline(
      &ImageConfig {
        boot: BootMode::Kernel,
        ..ImageConfig::default()
      },
      None,
    );
    let uboot = image_pipeline(&ImageConfig::default(), None);

    assert!(names(&kernel).contains(&"bootfs/kernel"));
    assert!(!names(&kernel).contains(&"bootfs/u-boot"));
    assert!(names(&uboot).contains(&"bootfs/u-boot"));
    assert!(!names(&uboot).contains(&"bootfs/kernel"));
  }

  #[test]
  fn optional_components_can_be_dropped() {
    let image = ImageConfig {
      oml2: false,
      lldp: false,
      ..ImageConfig::default()
    };
    let pipeline = image_pipeline(&image, None);
    let names = names(&pipeline);

    assert!(!names.iter().any(|n| n.starts_with("oml2/")));
    assert!(!names.contains(&"lldp"));
    assert!(!names.contains(&"locale"));
  }

  #[test]
  fn locale_step_when_configured() {
    let image = ImageConfig {
      locale: Some("fr_FR.UTF-8".to_string()),
      ..ImageConfig::default()
    };
    assert!(names(&image_pipeline(&image, None)).contains(&"locale"));
  }

  #[test]
  fn order_bootstrap_first_archives_last() {
    let pipeline = image_pipeline(&ImageConfig::default(), Some(&storage()));
    let names = names(&pipeline);

    assert_eq!(names[0], "build-dir");
    assert_eq!(names[1], "rootfs/debootstrap");

    let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(pos("rootfs/apt-update") < pos("packages/base"));
    assert!(pos("rootfs/ntp") < pos("rootfs/archive"));
    assert!(pos("rootfs/archive") < pos("bootfs/u-boot"));
    assert!(pos("bootfs/u-boot") < pos("bootfs/archive"));
    assert_eq!(&names[names.len() - 2..], ["publish/rootfs", "publish/bootfs"]);
  }

  #[test]
  fn publish_only_when_target_given() {
    let without = image_pipeline(&ImageConfig::default(), None);
    assert!(!without.steps().iter().flat_map(|s| &s.actions).any(|a| matches!(a, Action::Publish { .. })));

    let with = image_pipeline(&ImageConfig::default(), Some(&storage()));
    let publishes = with
      .steps()
      .iter()
      .flat_map(|s| &s.actions)
      .filter(|a| matches!(a, Action::Publish { .. }))
      .count();
    assert_eq!(publishes, 2);
  }

  #[test]
  fn host_pipeline_installs_then_configures() {
    let pipeline = host_pipeline();
    assert_eq!(names(&pipeline), vec!["host/packages", "host/qemu-binfmt"]);
  }

  // ==========================================================================
  // Execution against a stub host
  // ==========================================================================

  fn full_store() -> MemoryTemplateStore {
    let mut store = MemoryTemplateStore::new();
    for id in [
      "rootfs/etc/ld.so.conf.d/vc.conf",
      "rootfs/etc/fstab",
      "rootfs/etc/hosts",
      "rootfs/etc/network/interfaces",
      "rootfs/etc/init.d/iotlab_nfs_mount",
      "rootfs/etc/ssh/ssh_config",
      "rootfs/etc/ssh/sshd_config",
      "rootfs/etc/default/lldpd",
      "rootfs/etc/ntp.conf",
      "keys/rootfs/root/authorized_keys",
      "src/oml2-2.11.0.tar.gz",
      "install_scripts/compile_oml2.sh",
      "install_scripts/compile_gateway_iotlab.sh",
      "bootfs/u-boot/config.txt",
    ] {
      store.insert(id, "content");
    }
    for kind in ["dsa", "ecdsa", "ed25519", "rsa"] {
      store.insert(format!("keys/rootfs/etc/ssh/ssh_host_{kind}_key"), "key");
      store.insert(format!("keys/rootfs/etc/ssh/ssh_host_{kind}_key.pub"), "pub");
    }
    store
  }

  #[tokio::test]
  async fn full_image_runs_against_stub() {
    let config = Config::default();
    let session = BuildSession::with_id(
      &BuildLayout {
        build_dir: "/srv/build".to_string(),
        ..BuildLayout::default()
      },
      "20150901120000",
    );
    let executor = StubExecutor::new().fail_command(" /tmp/compile_gateway_iotlab.sh", 2);
    let store = full_store();
    let ctx = StepContext::new(&executor, &store, &session).with_vars(config.vars());
    let pipeline = image_pipeline(&config.image, None);

    let report = pipeline.run(&ctx, &CancelSignal::never()).await;

    assert_eq!(report.status(), PipelineStatus::Completed);
    assert_eq!(report.step("gateway/compile").unwrap().status, StepStatus::Failed);
    assert_eq!(report.step("gateway/install").unwrap().status, StepStatus::Succeeded);

    let commands = executor.commands();
    assert!(commands.contains(
      &"debootstrap --foreign --no-check-gpg --include=ca-certificates --arch=armhf jessie rootfs-20150901120000 http://archive.raspbian.com/raspbian"
        .to_string()
    ));
    assert!(commands.contains(&"tar czf rootfs-20150901120000.tar.gz rootfs-20150901120000".to_string()));
    assert_eq!(
      executor
        .file("/srv/build/raspi-build-20150901120000/rootfs-20150901120000/etc/ssh/ssh_host_rsa_key")
        .as_deref(),
      Some("key")
    );
  }
}
