/// Prefix of the per-build directory, followed by the build id.
pub const DEFAULT_BUILD_PREFIX: &str = "raspi-build-";

pub const ROOTFS_PREFIX: &str = "rootfs-";
pub const BOOTFS_PREFIX: &str = "bootfs-";

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Appended to a remote path when its previous content is kept before an upload.
pub const BACKUP_SUFFIX: &str = ".bak";

/// `chrono` format of build ids: second resolution, sorts lexically.
pub const BUILD_ID_FORMAT: &str = "%Y%m%d%H%M%S";
