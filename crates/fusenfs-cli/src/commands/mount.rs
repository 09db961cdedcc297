//! Mount command for fuse-nfs.

use std::path::PathBuf;

use clap::Args;
use fusenfs_config::{HumanDuration, MountConfig};

/// Mount arguments. Each flag overrides the matching config file value.
#[derive(Args, Debug, Default)]
pub struct MountArgs {
    /// Export to mount, e.g. nfs://server/export?uid=1000&gid=1000
    #[arg(short = 'n', long)]
    pub nfs_share: Option<String>,
    /// Directory to mount the export at
    #[arg(short = 'm', long)]
    pub mountpoint: Option<PathBuf>,
    /// Send this uid on every request instead of the caller's
    #[arg(short = 'U', long = "fusenfs-uid")]
    pub uid: Option<u32>,
    /// Send this gid on every request instead of the caller's
    #[arg(short = 'G', long = "fusenfs-gid")]
    pub gid: Option<u32>,
    /// Let users other than the mounting user keep their own ids
    #[arg(short = 'o', long = "fusenfs-allow-other-own-ids")]
    pub allow_other_own_ids: bool,
    /// Allow other users to access the mount
    #[arg(short = 'a', long)]
    pub allow_other: bool,
    /// Allow root to access the mount
    #[arg(short = 'r', long)]
    pub allow_root: bool,
    /// Let the kernel check permission bits (0 or 1)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub default_permissions: Option<u8>,
    /// Mount read-only
    #[arg(short = 'O', long)]
    pub read_only: bool,
    /// Serve kernel requests from several threads (0 or 1)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub multithread: Option<u8>,
    /// Owner uid the kernel reports for every file
    #[arg(short = 'u', long = "uid")]
    pub fuse_uid: Option<u32>,
    /// Owner gid the kernel reports for every file
    #[arg(short = 'g', long = "gid")]
    pub fuse_gid: Option<u32>,
    /// Filesystem name shown by mount(8)
    #[arg(short = 'f', long)]
    pub fsname: Option<String>,
    /// Filesystem subtype shown by mount(8)
    #[arg(short = 's', long)]
    pub subtype: Option<String>,
    /// Largest write the kernel may send, in bytes
    #[arg(short = 'W', long)]
    pub max_write: Option<u32>,
    /// Bypass the page cache for file I/O
    #[arg(short = 'd', long)]
    pub direct_io: bool,
    /// How long the kernel may cache name lookups (e.g. 1s, 500ms)
    #[arg(short = 'E', long)]
    pub entry_timeout: Option<HumanDuration>,
    /// How long the kernel may cache attributes (e.g. 1s, 500ms)
    #[arg(short = 'T', long)]
    pub attr_timeout: Option<HumanDuration>,
    /// Log at debug level
    #[arg(short = 'D', long)]
    pub debug: bool,
    /// Also write logs to this file
    #[arg(short = 'l', long)]
    pub log_file: Option<PathBuf>,
}

impl MountArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply_to(&self, config: &mut MountConfig) {
        if let Some(share) = &self.nfs_share {
            config.target = Some(share.clone());
        }
        if let Some(mountpoint) = &self.mountpoint {
            config.mountpoint = Some(mountpoint.clone());
        }
        if self.uid.is_some() {
            config.identity.uid = self.uid;
        }
        if self.gid.is_some() {
            config.identity.gid = self.gid;
        }
        config.identity.allow_other_own_ids |= self.allow_other_own_ids;

        let fuse = &mut config.fuse;
        fuse.allow_other |= self.allow_other;
        fuse.allow_root |= self.allow_root;
        fuse.read_only |= self.read_only;
        fuse.direct_io |= self.direct_io;
        if let Some(flag) = self.default_permissions {
            fuse.default_permissions = flag == 1;
        }
        if let Some(flag) = self.multithread {
            fuse.multithread = flag == 1;
        }
        if self.fuse_uid.is_some() {
            fuse.uid = self.fuse_uid;
        }
        if self.fuse_gid.is_some() {
            fuse.gid = self.fuse_gid;
        }
        if let Some(fsname) = &self.fsname {
            fuse.fsname = Some(fsname.clone());
        }
        if let Some(subtype) = &self.subtype {
            fuse.subtype = Some(subtype.clone());
        }
        if let Some(max_write) = self.max_write {
            fuse.max_write = max_write;
        }
        if let Some(ttl) = self.entry_timeout {
            fuse.entry_timeout = ttl;
        }
        if let Some(ttl) = self.attr_timeout {
            fuse.attr_timeout = ttl;
        }

        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
    }
}

/// Run the mount command.
///
/// Serves requests until the mount goes away or the process is
/// interrupted, in which case the mount point is unmounted first.
#[cfg(unix)]
pub async fn run(config: MountConfig) -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;

    use fusenfs_config::{ConfigError, RemoteTarget};
    use fusenfs_core::{Identity, IdentityMapper, RemoteSession};
    use fusenfs_fuse::{mount, mount_options, NfsFsCore, UnixFuse};
    use fusenfs_remote::{connect, Connection};
    use tracing::info;

    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(messages.join("; ").into());
    }

    let url = config.target.clone().ok_or(ConfigError::MissingTarget)?;
    let mountpoint = config
        .mountpoint
        .clone()
        .ok_or(ConfigError::MissingMountpoint)?;
    let target = RemoteTarget::parse(&url)?;

    // Ensure mount point exists
    if !mountpoint.exists() {
        std::fs::create_dir_all(&mountpoint)?;
    }

    let mount_identity = Identity::current_process();
    let Connection { client, server } = connect(&target, mount_identity)?;

    let identity = IdentityMapper::from_config(&config.identity, mount_identity);
    let session = Arc::new(RemoteSession::new(
        url.clone(),
        client,
        identity,
        config.drive.poll_timeout.as_duration(),
    ));

    let fs = UnixFuse::new(NfsFsCore::new(Arc::clone(&session)), &config.fuse);
    let options = mount_options(&config.fuse, &url);

    let mut serving = {
        let mountpoint = mountpoint.clone();
        tokio::task::spawn_blocking(move || mount(fs, &mountpoint, &options))
    };

    tokio::select! {
        result = &mut serving => result??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted, unmounting {}", mountpoint.display());
            super::unmount::unmount(&mountpoint, false)?;
            serving.await??;
        }
    }

    let stats = session.stats();
    info!(
        issued = stats.issued,
        completed = stats.completed,
        rejected = stats.rejected,
        connection_failures = stats.connection_failures,
        "Session closed"
    );

    // The in-process export lives until the mount is gone.
    drop(server);
    Ok(())
}

#[cfg(not(unix))]
pub async fn run(_config: MountConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err("Mounting requires a Unix FUSE implementation".into())
}
