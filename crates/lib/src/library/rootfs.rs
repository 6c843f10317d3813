//! Root filesystem steps: bootstrap and post-install.

use crate::config::ImageConfig;
use crate::pipeline::Step;
use crate::template::TemplateSpec;

/// Run `command` inside the rootfs.
pub(super) fn chroot(command: &str) -> String {
  format!("chroot $${{rootfs_dir}} {command}")
}

/// Template uploaded to the same path inside the rootfs.
pub(super) fn rootfs_file(path: &str) -> TemplateSpec {
  TemplateSpec::new(format!("rootfs/{path}"), format!("$${{rootfs_dir}}/{path}"))
}

fn mkdir_unless_exists(name: &str, path: &str) -> Step {
  Step::new(name)
    .unless_exists(format!("$${{rootfs_dir}}/{path}"))
    .run(format!("mkdir -p $${{rootfs_dir}}/{path}"))
}

/// Foreign debootstrap, qemu emulation, second stage, Pi firmware.
pub fn bootstrap_steps() -> Vec<Step> {
  vec![
    Step::new("build-dir").run("mkdir -p $${root_dir}"),
    Step::new("rootfs/debootstrap").run_in(
      "$${root_dir}",
      "debootstrap --foreign --no-check-gpg --include=ca-certificates --arch=$${arch} $${suite} $${rootfs_name} $${bootstrap_mirror}",
    ),
    Step::new("rootfs/qemu")
      .run_in("$${root_dir}", "cp $(which qemu-arm-static) $${rootfs_name}/usr/bin")
      .run_in("$${root_dir}", "chown -R root:root $${rootfs_name}"),
    Step::new("rootfs/second-stage").run_in(
      "$${root_dir}",
      "chroot $${rootfs_name}/ /debootstrap/debootstrap --second-stage --verbose",
    ),
    Step::new("rootfs/firmware")
      .run("cp -r $${firmware_dir}/hardfp/opt/* $${rootfs_dir}/opt/")
      .run("mkdir -p $${rootfs_dir}/lib/modules/")
      .run("cp -r $${firmware_dir}/modules/* $${rootfs_dir}/lib/modules/"),
  ]
}

/// System configuration up to and including the package sources.
pub fn base_config_steps(image: &ImageConfig) -> Vec<Step> {
  let mut steps = vec![
    Step::new("rootfs/hostname")
      .run_in("$${rootfs_dir}", "rm -f etc/hostname")
      .run_in("$${rootfs_dir}", "ln -s /var/local/config/hostname etc/hostname"),
    Step::new("rootfs/vc.conf").upload(rootfs_file("etc/ld.so.conf.d/vc.conf")),
    mkdir_unless_exists("rootfs/var-tmp", "var/tmp"),
    mkdir_unless_exists("rootfs/var-lib-dhcp", "var/lib/dhcp"),
    mkdir_unless_exists("rootfs/var-volatile", "var/volatile"),
  ];

  let mut sources = Step::new("rootfs/apt-sources");
  for (index, line) in image.apt_sources.iter().enumerate() {
    let redirect = if index == 0 { ">" } else { ">>" };
    sources = sources.run(format!("echo \"{line}\" {redirect} $${{rootfs_dir}}/etc/apt/sources.list"));
  }
  steps.push(sources);

  if !image.apt_keys.is_empty() {
    let keys = image.apt_keys.iter().fold(Step::new("rootfs/apt-keys"), |step, url| {
      step.run(chroot(&format!("sh -c 'wget -O - {url} | apt-key add -'")))
    });
    steps.push(keys);
  }

  steps.push(Step::new("rootfs/apt-update").run(chroot("apt-get update")));
  steps
}

/// Mounts, NFS layout, time and device naming.
pub fn system_steps() -> Vec<Step> {
  vec![
    Step::new("rootfs/config-files")
      .upload(rootfs_file("etc/fstab"))
      .upload(rootfs_file("etc/hosts"))
      .upload(rootfs_file("etc/network/interfaces")),
    Step::new("rootfs/nfs-mount")
      .upload(rootfs_file("etc/init.d/iotlab_nfs_mount"))
      .run("chmod +x $${rootfs_dir}/etc/init.d/iotlab_nfs_mount")
      .run(chroot("update-rc.d iotlab_nfs_mount defaults")),
    mkdir_unless_exists("rootfs/var-local-config", "var/local/config"),
    mkdir_unless_exists("rootfs/iotlab-users", "iotlab/users"),
    Step::new("rootfs/timezone")
      .run("echo \"$${timezone}\" > $${rootfs_dir}/etc/timezone")
      .run(chroot("dpkg-reconfigure -f noninteractive tzdata")),
    Step::new("rootfs/udev-net-rule")
      .unless_exists("$${rootfs_dir}/etc/udev/rules.d/75-persistent-net-generator.rules")
      .run_in(
        "$${rootfs_dir}",
        "ln -s /dev/null etc/udev/rules.d/75-persistent-net-generator.rules",
      ),
  ]
}

pub fn ntp_step() -> Step {
  Step::new("rootfs/ntp").upload(rootfs_file("etc/ntp.conf"))
}

/// Keyboard and default locale. Needs the `locale` variable.
pub fn locale_step() -> Step {
  Step::new("locale")
    .upload(TemplateSpec::new(
      "debconf/keyboard-configuration.conf",
      "$${rootfs_dir}/tmp/keyboard-configuration.conf",
    ))
    .run(format!(
      "{} < $${{rootfs_dir}}/tmp/keyboard-configuration.conf",
      chroot("debconf-set-selections")
    ))
    .run(chroot("dpkg-reconfigure -f noninteractive keyboard-configuration"))
    .run(format!(
      "echo \"locales locales/default_environment_locale select $${{locale}}\" | {}",
      chroot("debconf-set-selections")
    ))
    .run(format!(
      "echo \"locales locales/locales_to_be_generated multiselect $${{locale}} UTF-8\" | {}",
      chroot("debconf-set-selections")
    ))
    .run(chroot("locale-gen --purge $${locale}"))
}

pub fn archive_step() -> Step {
  Step::new("rootfs/archive").archive("$${root_dir}", "$${rootfs_name}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::{Action, Check};

  fn commands(step: &Step) -> Vec<&str> {
    step
      .actions
      .iter()
      .filter_map(|a| match a {
        Action::Run { command, .. } => Some(command.as_str()),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn locale_generation_purges_others() {
    let step = locale_step();
    assert_eq!(
      commands(&step).last(),
      Some(&"chroot $${rootfs_dir} locale-gen --purge $${locale}")
    );
  }

  #[test]
  fn chroot_prefix() {
    assert_eq!(chroot("apt-get update"), "chroot $${rootfs_dir} apt-get update");
  }

  #[test]
  fn tmpfs_mount_points_are_checked() {
    let steps = base_config_steps(&ImageConfig::default());
    let checked: Vec<_> = steps
      .iter()
      .filter_map(|s| match &s.check {
        Some(Check::PathExists(path)) => Some(path.as_str()),
        _ => None,
      })
      .collect();

    assert_eq!(
      checked,
      vec![
        "$${rootfs_dir}/var/tmp",
        "$${rootfs_dir}/var/lib/dhcp",
        "$${rootfs_dir}/var/volatile"
      ]
    );
  }

  #[test]
  fn sources_overwrite_then_append() {
    let steps = base_config_steps(&ImageConfig::default());
    let sources = steps.iter().find(|s| s.name == "rootfs/apt-sources").unwrap();
    let cmds = commands(sources);

    assert_eq!(cmds.len(), 2);
    assert!(cmds[0].ends_with("> $${rootfs_dir}/etc/apt/sources.list"));
    assert!(!cmds[0].contains(">>"));
    assert!(cmds[1].contains(">> $${rootfs_dir}/etc/apt/sources.list"));
  }

  #[test]
  fn key_import_runs_inside_chroot() {
    let steps = base_config_steps(&ImageConfig::default());
    let keys = steps.iter().find(|s| s.name == "rootfs/apt-keys").unwrap();

    assert_eq!(
      commands(keys),
      vec![
        "chroot $${rootfs_dir} sh -c 'wget -O - http://archive.raspberrypi.org/debian/raspberrypi.gpg.key | apt-key add -'"
      ]
    );
  }

  #[test]
  fn no_keys_no_key_step() {
    let image = ImageConfig {
      apt_keys: Vec::new(),
      ..ImageConfig::default()
    };
    assert!(!base_config_steps(&image).iter().any(|s| s.name == "rootfs/apt-keys"));
  }

  #[test]
  fn bootstrap_runs_in_build_dir() {
    let steps = bootstrap_steps();
    let debootstrap = &steps[1];

    assert!(matches!(
      &debootstrap.actions[0],
      Action::Run { cwd: Some(cwd), command } if cwd == "$${root_dir}" && command.starts_with("debootstrap --foreign")
    ));
  }
}
