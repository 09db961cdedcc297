//! Values exchanged with the remote client.

use serde::{Deserialize, Serialize};

/// A local or remote security identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Identity { uid, gid }
    }

    /// Real uid/gid of this process.
    pub fn current_process() -> Self {
        // SAFETY: getuid/getgid have no preconditions and cannot fail.
        unsafe {
            Identity {
                uid: libc::getuid(),
                gid: libc::getgid(),
            }
        }
    }
}

/// Seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timespec {
    pub secs: i64,
    pub nsecs: u32,
}

impl Timespec {
    pub const fn new(secs: i64, nsecs: u32) -> Self {
        Timespec { secs, nsecs }
    }
}

/// Attributes of a remote object as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteStat {
    pub dev: u64,
    pub ino: u64,
    /// File type and permission bits (`S_IFMT | 0o7777`).
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Filesystem statistics for the export.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteStatVfs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u32,
}

/// One entry returned from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDirEntry {
    pub name: String,
    pub ino: u64,
    /// Type and permission bits, `0` when the server did not say.
    pub mode: u32,
}

/// Opaque handle to a file opened on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFh(pub u64);

/// A remote operation. Paths are absolute within the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteRequest {
    Lstat { path: String },
    /// Reads the whole directory in one call.
    Opendir { path: String },
    Readlink { path: String },
    Open { path: String, flags: i32 },
    Close { fh: RemoteFh },
    Pread { fh: RemoteFh, offset: u64, count: u32 },
    Pwrite { fh: RemoteFh, offset: u64, data: Vec<u8> },
    Creat { path: String, mode: u32 },
    Utime { path: String, atime: Timespec, mtime: Timespec },
    Unlink { path: String },
    Rmdir { path: String },
    Mkdir { path: String },
    Mknod { path: String, mode: u32, rdev: u64 },
    Symlink { target: String, link: String },
    Rename { from: String, to: String },
    Link { from: String, to: String },
    Chmod { path: String, mode: u32 },
    Chown { path: String, uid: Option<u32>, gid: Option<u32> },
    Truncate { path: String, size: u64 },
    Fsync { fh: RemoteFh },
    Statvfs { path: String },
}

impl RemoteRequest {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteRequest::Lstat { .. } => "lstat",
            RemoteRequest::Opendir { .. } => "opendir",
            RemoteRequest::Readlink { .. } => "readlink",
            RemoteRequest::Open { .. } => "open",
            RemoteRequest::Close { .. } => "close",
            RemoteRequest::Pread { .. } => "pread",
            RemoteRequest::Pwrite { .. } => "pwrite",
            RemoteRequest::Creat { .. } => "creat",
            RemoteRequest::Utime { .. } => "utime",
            RemoteRequest::Unlink { .. } => "unlink",
            RemoteRequest::Rmdir { .. } => "rmdir",
            RemoteRequest::Mkdir { .. } => "mkdir",
            RemoteRequest::Mknod { .. } => "mknod",
            RemoteRequest::Symlink { .. } => "symlink",
            RemoteRequest::Rename { .. } => "rename",
            RemoteRequest::Link { .. } => "link",
            RemoteRequest::Chmod { .. } => "chmod",
            RemoteRequest::Chown { .. } => "chown",
            RemoteRequest::Truncate { .. } => "truncate",
            RemoteRequest::Fsync { .. } => "fsync",
            RemoteRequest::Statvfs { .. } => "statvfs",
        }
    }

    /// Every path the request names, in argument order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            RemoteRequest::Lstat { path }
            | RemoteRequest::Opendir { path }
            | RemoteRequest::Readlink { path }
            | RemoteRequest::Open { path, .. }
            | RemoteRequest::Creat { path, .. }
            | RemoteRequest::Utime { path, .. }
            | RemoteRequest::Unlink { path }
            | RemoteRequest::Rmdir { path }
            | RemoteRequest::Mkdir { path }
            | RemoteRequest::Mknod { path, .. }
            | RemoteRequest::Chmod { path, .. }
            | RemoteRequest::Chown { path, .. }
            | RemoteRequest::Truncate { path, .. }
            | RemoteRequest::Statvfs { path } => vec![path.as_str()],
            // The symlink target is stored verbatim and is not a lookup path.
            RemoteRequest::Symlink { link, .. } => vec![link.as_str()],
            RemoteRequest::Rename { from, to } | RemoteRequest::Link { from, to } => {
                vec![from.as_str(), to.as_str()]
            }
            RemoteRequest::Close { .. }
            | RemoteRequest::Pread { .. }
            | RemoteRequest::Pwrite { .. }
            | RemoteRequest::Fsync { .. } => Vec::new(),
        }
    }
}

/// Successful result payload of a remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RemoteReply {
    Done,
    Stat(RemoteStat),
    Dir(Vec<RemoteDirEntry>),
    /// Symlink target bytes.
    Link(Vec<u8>),
    Opened(RemoteFh),
    Data(Vec<u8>),
    Written(u32),
    StatVfs(RemoteStatVfs),
}

impl RemoteReply {
    /// Cut variable-length payloads down to `limit` bytes.
    pub fn truncate_to(&mut self, limit: usize) {
        match self {
            RemoteReply::Data(bytes) | RemoteReply::Link(bytes) => bytes.truncate(limit),
            _ => {}
        }
    }
}
