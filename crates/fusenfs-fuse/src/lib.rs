//! FUSE frontend for fuse-nfs.
//!
//! [`NfsFsCore`] holds the path-based verbs and is usable without a kernel
//! mount. On Unix, [`UnixFuse`] adapts it to `fuser`, assigning inode
//! numbers to the paths the kernel has seen.

pub mod adapter;
pub mod dispatch;
pub mod error;
pub mod inode;
pub mod stat;

#[cfg(unix)]
pub mod mount;
#[cfg(unix)]
pub mod unix_fuse;

pub use adapter::{DirEntry, NfsFsCore};
pub use dispatch::Dispatcher;
pub use error::{FuseError, FuseResult};
pub use inode::{InodeTable, ROOT_INO};
pub use stat::{FileKind, FileStat, FsStats};

#[cfg(unix)]
pub use mount::{mount, mount_options};
#[cfg(unix)]
pub use unix_fuse::UnixFuse;
