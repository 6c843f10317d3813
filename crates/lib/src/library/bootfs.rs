//! Boot partition steps.

use crate::config::BootMode;
use crate::pipeline::Step;
use crate::template::TemplateSpec;

/// Firmware boot files plus the kernel command line.
fn kernel_step() -> Step {
  Step::new("bootfs/kernel")
    .run("mkdir -p $${bootfs_dir}")
    .run("cp -r $${firmware_dir}/boot/* $${bootfs_dir}")
    .upload(TemplateSpec::new(
      "bootfs/kernel/cmdline.txt",
      "$${bootfs_dir}/cmdline.txt",
    ))
}

/// u-boot chained from the firmware, all memory given to the system.
///
/// The firmware files are copied before `config.txt` is uploaded so the
/// template is what ends up on the partition.
fn uboot_step() -> Step {
  Step::new("bootfs/u-boot")
    .run("mkdir -p $${bootfs_dir}")
    .run("cp $${firmware_noob_dir}/boot/u-boot.bin $${bootfs_dir}")
    .run("cp $${firmware_noob_dir}/boot/boot.scr.uimg $${bootfs_dir}")
    .run("cp $${firmware_noob_dir}/boot/* $${bootfs_dir}/")
    .upload(TemplateSpec::new(
      "bootfs/u-boot/config.txt",
      "$${bootfs_dir}/config.txt",
    ))
}

pub fn bootfs_steps(boot: BootMode) -> Vec<Step> {
  let populate = match boot {
    BootMode::Kernel => kernel_step(),
    BootMode::Uboot => uboot_step(),
  };
  vec![
    populate,
    Step::new("bootfs/archive").archive("$${root_dir}", "$${bootfs_name}"),
  ]
}
