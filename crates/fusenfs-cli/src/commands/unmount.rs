//! Unmount command for fuse-nfs mounts.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Unmount arguments.
pub struct UnmountArgs {
    /// Mount point path to unmount.
    pub mountpoint: PathBuf,
    /// Force unmount even if busy.
    pub force: bool,
}

/// Run the unmount command.
pub fn run(args: UnmountArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mountpoint = args
        .mountpoint
        .canonicalize()
        .unwrap_or(args.mountpoint.clone());

    unmount(&mountpoint, args.force)?;

    println!("Unmounted {}", mountpoint.display());
    Ok(())
}

/// Ask the system to detach the FUSE mount at `mountpoint`.
pub fn unmount(mountpoint: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(target_os = "macos")]
    {
        unmount_macos(mountpoint, force)
    }

    #[cfg(target_os = "linux")]
    {
        unmount_linux(mountpoint, force)
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = (mountpoint, force);
        Err("Unmount not supported on this platform".into())
    }
}

#[cfg(target_os = "macos")]
fn unmount_macos(mountpoint: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new("umount");

    if force {
        cmd.arg("-f");
    }

    cmd.arg(mountpoint);

    let output = cmd.output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("umount failed: {}", stderr.trim()).into());
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn unmount_linux(mountpoint: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    // fusermount works without privileges for the mounting user
    let mut cmd = Command::new("fusermount");
    cmd.arg("-u");

    if force {
        cmd.arg("-z"); // Lazy unmount
    }

    cmd.arg(mountpoint);

    if let Ok(out) = cmd.output() {
        if out.status.success() {
            return Ok(());
        }
    }

    let mut cmd = Command::new("umount");

    if force {
        cmd.arg("-l"); // Lazy unmount
    }

    cmd.arg(mountpoint);

    let output = cmd.output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("umount failed: {}", stderr.trim()).into());
    }

    Ok(())
}
