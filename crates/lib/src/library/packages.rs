//! Software installed into the rootfs.

use crate::config::ImageConfig;
use crate::pipeline::Step;
use crate::template::TemplateSpec;

use super::rootfs::{chroot, rootfs_file};

const OML2_TARBALL: &str = "oml2-2.11.0.tar.gz";

const HOST_KEYS: [&str; 4] = ["dsa", "ecdsa", "ed25519", "rsa"];

fn apt_install(packages: &str) -> String {
  chroot(&format!("apt-get -y --force-yes install {packages}"))
}

/// Upload an install script to the rootfs `/tmp` and run it there.
fn chroot_script(step: Step, script: &str) -> Step {
  step
    .upload(TemplateSpec::new(
      format!("install_scripts/{script}"),
      format!("$${{rootfs_dir}}/tmp/{script}"),
    ))
    .run(format!("chmod +x $${{rootfs_dir}}/tmp/{script}"))
}

pub fn package_steps(image: &ImageConfig) -> Vec<Step> {
  let mut steps = vec![Step::new("packages/transport").run(apt_install("apt-transport-https"))];
  if !image.packages.is_empty() {
    steps.push(Step::new("packages/base").run(apt_install(&image.packages.join(" "))));
  }
  steps
}

/// SSH server, fixed host keys, admin keys.
pub fn ssh_steps() -> Vec<Step> {
  let mut host_keys = Step::new("ssh/host-keys");
  for kind in HOST_KEYS {
    let key = format!("etc/ssh/ssh_host_{kind}_key");
    host_keys = host_keys
      .upload(
        TemplateSpec::new(format!("keys/rootfs/{key}"), format!("$${{rootfs_dir}}/{key}"))
          .raw()
          .no_backup()
          .mode(0o600),
      )
      .upload(
        TemplateSpec::new(format!("keys/rootfs/{key}.pub"), format!("$${{rootfs_dir}}/{key}.pub"))
          .raw()
          .no_backup()
          .mode(0o644),
      );
  }

  vec![
    Step::new("ssh/server")
      .run(apt_install("ssh"))
      .upload(rootfs_file("etc/ssh/ssh_config"))
      .upload(rootfs_file("etc/ssh/sshd_config")),
    host_keys,
    Step::new("ssh/root-dir")
      .unless_exists("$${rootfs_dir}/root/.ssh")
      .run("mkdir $${rootfs_dir}/root/.ssh"),
    Step::new("ssh/admin-keys")
      .run("chown root:root $${rootfs_dir}/root/.ssh")
      .run("chmod 700 $${rootfs_dir}/root/.ssh")
      .upload(
        TemplateSpec::new("keys/rootfs/root/authorized_keys", "$${rootfs_dir}/root/.ssh/authorized_keys").raw(),
      )
      .run("chmod 600 $${rootfs_dir}/root/.ssh/authorized_keys"),
  ]
}

/// OML2 measurement library, built from source inside the rootfs.
pub fn oml2_steps() -> Vec<Step> {
  vec![
    Step::new("oml2/deps").run(apt_install(
      "libxml2-dev libpopt-dev libsqlite3-dev pkg-config libxml2-utils ruby",
    )),
    Step::new("oml2/sources")
      .upload(
        TemplateSpec::new(
          format!("src/{OML2_TARBALL}"),
          format!("$${{rootfs_dir}}/usr/local/src/{OML2_TARBALL}"),
        )
        .raw(),
      )
      .run(format!(
        "tar -xzf $${{rootfs_dir}}/usr/local/src/{OML2_TARBALL} -C $${{rootfs_dir}}/usr/local/src/"
      )),
    chroot_script(Step::new("oml2/compile"), "compile_oml2.sh").run(chroot("/tmp/compile_oml2.sh")),
  ]
}

/// IoT-LAB gateway manager. Its compile step is allowed to fail.
pub fn gateway_steps() -> Vec<Step> {
  vec![
    chroot_script(
      Step::new("gateway/deps")
        .run(chroot(
          "apt-get install -y --force-yes python-dev python-setuptools socat avrdude openocd",
        ))
        .run("cp -r $${gateway_dir} $${rootfs_dir}/usr/local/src"),
      "compile_gateway_iotlab.sh",
    ),
    Step::new("gateway/compile")
      .run(chroot("/tmp/compile_gateway_iotlab.sh"))
      .best_effort(),
    Step::new("gateway/install")
      .run("cp $${gateway_dir}/bin/rules.d/*.rules $${rootfs_dir}/etc/udev/rules.d/")
      .run("cp $${gateway_dir}/bin/init_script/gateway-server-daemon $${rootfs_dir}/etc/init.d/")
      .run("chmod 755 $${rootfs_dir}/etc/init.d/gateway-server-daemon")
      .run(chroot(
        "update-rc.d gateway-server-daemon start 80 2 3 4 5 . stop 20 0 1 6 .",
      ))
      .run(chroot("adduser www-data dialout"))
      .run(chroot("mkdir -p /home/www"))
      .run(chroot("chown www-data:www-data /home/www"))
      .run(chroot("usermod -d /home/www www-data")),
  ]
}

pub fn lldp_step() -> Step {
  Step::new("lldp")
    .run(apt_install("lldpd"))
    .upload(rootfs_file("etc/default/lldpd"))
}
