use fusenfs_core::RemoteError;

/// Result type for filesystem verbs.
pub type FuseResult<T> = Result<T, FuseError>;

/// Errors a filesystem verb can report to the kernel.
#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    /// Failure reported by the remote client or server.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The open-file handle is unknown or already released.
    #[error("bad file handle {0}")]
    BadHandle(u64),
    /// The kernel named an inode we no longer track.
    #[error("unknown inode {0}")]
    UnknownInode(u64),
    /// A name that is not valid UTF-8 or contains a separator.
    #[error("invalid name")]
    InvalidName,
    /// The remote answered with a reply of the wrong shape.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FuseError {
    /// Convert to a libc errno.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Remote(e) => e.errno(),
            FuseError::BadHandle(_) => libc::EBADF,
            FuseError::UnknownInode(_) => libc::ENOENT,
            FuseError::InvalidName => libc::EINVAL,
            FuseError::UnexpectedReply(_) => libc::EIO,
            FuseError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
