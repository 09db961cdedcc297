//! Local attribute structures built from remote replies.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fusenfs_core::{Identity, IdentityMapper, RemoteStat, RemoteStatVfs, Timespec};

/// Type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
}

impl FileKind {
    /// Decode the `S_IFMT` bits of `mode`. `None` if they name no known type.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Some(FileKind::RegularFile),
            libc::S_IFDIR => Some(FileKind::Directory),
            libc::S_IFLNK => Some(FileKind::Symlink),
            libc::S_IFCHR => Some(FileKind::CharDevice),
            libc::S_IFBLK => Some(FileKind::BlockDevice),
            libc::S_IFIFO => Some(FileKind::NamedPipe),
            libc::S_IFSOCK => Some(FileKind::Socket),
            _ => None,
        }
    }
}

/// Attributes of a file as seen by a local caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Remote inode number.
    pub ino: u64,
    pub kind: FileKind,
    /// Permission bits (`0o7777`).
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileStat {
    /// Copy `st` field by field, mapping ownership for `caller`.
    pub fn from_remote(st: &RemoteStat, mapper: &IdentityMapper, caller: Identity) -> Self {
        FileStat {
            ino: st.ino,
            // Servers that omit the type bits serve plain files.
            kind: FileKind::from_mode(st.mode).unwrap_or(FileKind::RegularFile),
            perm: (st.mode & 0o7777) as u16,
            nlink: st.nlink,
            uid: mapper.to_local_uid(st.uid, caller),
            gid: mapper.to_local_gid(st.gid, caller),
            rdev: st.rdev,
            size: st.size,
            blksize: st.blksize,
            blocks: st.blocks,
            atime: to_system_time(st.atime),
            mtime: to_system_time(st.mtime),
            ctime: to_system_time(st.ctime),
        }
    }
}

/// Filesystem statistics in the shape `statfs(2)` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl From<&RemoteStatVfs> for FsStats {
    fn from(st: &RemoteStatVfs) -> Self {
        FsStats {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namemax,
            frsize: st.frsize,
        }
    }
}

pub fn to_system_time(ts: Timespec) -> SystemTime {
    if ts.secs >= 0 {
        UNIX_EPOCH + Duration::new(ts.secs as u64, ts.nsecs)
    } else {
        UNIX_EPOCH - Duration::from_secs(ts.secs.unsigned_abs()) + Duration::from_nanos(ts.nsecs as u64)
    }
}

pub fn to_timespec(time: SystemTime) -> Timespec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => Timespec::new(d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            let before = e.duration();
            let mut secs = -(before.as_secs() as i64);
            let mut nsecs = before.subsec_nanos();
            if nsecs > 0 {
                secs -= 1;
                nsecs = 1_000_000_000 - nsecs;
            }
            Timespec::new(secs, nsecs)
        }
    }
}
