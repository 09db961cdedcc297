/// Errors that can surface from a remote call.
///
/// Errno values are carried as positive POSIX codes; the kernel interface
/// negates them where its ABI wants negative status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// The client refused the request before it reached the wire.
    #[error("request rejected: {reason} ({})", describe_errno(errno))]
    Rejected { errno: i32, reason: String },

    /// The server completed the request with an error status.
    #[error("remote operation failed: {}", describe_errno(.0))]
    Status(i32),

    /// The connection failed before the request completed.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl RemoteError {
    /// Build a rejection carrying `EINVAL`.
    pub fn invalid(reason: impl Into<String>) -> Self {
        RemoteError::Rejected {
            errno: libc::EINVAL,
            reason: reason.into(),
        }
    }

    /// The POSIX errno to report to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            RemoteError::Rejected { errno, .. } => *errno,
            RemoteError::Status(errno) => *errno,
            RemoteError::Connection(_) => libc::EIO,
        }
    }

    /// Returns true if the connection itself is gone.
    pub fn is_connection(&self) -> bool {
        matches!(self, RemoteError::Connection(_))
    }
}

impl From<RemoteError> for std::io::Error {
    fn from(e: RemoteError) -> Self {
        std::io::Error::from_raw_os_error(e.errno())
    }
}

fn describe_errno(errno: &i32) -> String {
    std::io::Error::from_raw_os_error(*errno).to_string()
}
