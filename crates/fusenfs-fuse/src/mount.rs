//! Mounting a [`UnixFuse`] filesystem.

use std::io;
use std::path::Path;

use fuser::MountOption;
use tracing::info;

use fusenfs_config::{FuseConfig, DEFAULT_SUBTYPE};

use crate::unix_fuse::UnixFuse;

/// Build the mount options for `config`. `fsname` is used when the
/// config does not name the filesystem itself.
pub fn mount_options(config: &FuseConfig, fsname: &str) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fsname.clone().unwrap_or_else(|| fsname.to_string())),
        MountOption::Subtype(
            config
                .subtype
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBTYPE.to_string()),
        ),
    ];

    // allow_other already admits root; fuser rejects the pair.
    if config.allow_other {
        options.push(MountOption::AllowOther);
    } else if config.allow_root {
        options.push(MountOption::AllowRoot);
    }
    if config.default_permissions {
        options.push(MountOption::DefaultPermissions);
    }
    if config.read_only {
        options.push(MountOption::RO);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if let Some(uid) = config.uid {
        options.push(MountOption::CUSTOM(format!("uid={uid}")));
    }
    if let Some(gid) = config.gid {
        options.push(MountOption::CUSTOM(format!("gid={gid}")));
    }
    options
}

/// Mount and serve in the calling thread until unmounted.
pub fn mount(fs: UnixFuse, mountpoint: &Path, options: &[MountOption]) -> io::Result<()> {
    info!(
        workers = fs.workers(),
        "Mounting {} at {:?}",
        fs.core().session().target(),
        mountpoint
    );
    fuser::mount2(fs, mountpoint, options)?;
    info!("{:?} unmounted", mountpoint);
    Ok(())
}
