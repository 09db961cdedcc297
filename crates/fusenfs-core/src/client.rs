use std::os::unix::io::RawFd;

use crate::error::RemoteError;
use crate::types::{RemoteReply, RemoteRequest};

/// Completion callback for one submitted request. Invoked exactly once,
/// from inside [`RemoteClient::service`] or when the client is torn down.
pub type Callback = Box<dyn FnOnce(Result<RemoteReply, RemoteError>) + Send>;

/// Network events the client wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const READ_WRITE: Interest = Interest {
        readable: true,
        writable: true,
    };

    pub(crate) fn poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Events observed on the client's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Hang-up or error condition reported by the kernel.
    pub hangup: bool,
}

impl Readiness {
    pub(crate) fn from_revents(revents: libc::c_short) -> Self {
        Readiness {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            hangup: revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable && !self.hangup
    }
}

/// A single-connection, callback-driven remote filesystem client.
///
/// Implementations are not reentrant: callers must serialize every method
/// call. [`DriveLoop`](crate::DriveLoop) does this with its drive token.
pub trait RemoteClient: Send {
    /// Queue `request`; `callback` fires later from [`service`](Self::service).
    ///
    /// An `Err` means the request was refused and `callback` was dropped
    /// without being called.
    fn submit(&mut self, request: RemoteRequest, callback: Callback) -> Result<(), RemoteError>;

    /// Events the connection currently needs.
    fn which_events(&self) -> Interest;

    /// Descriptor to poll for [`which_events`](Self::which_events).
    fn as_raw_fd(&self) -> RawFd;

    /// Advance the connection state machine with the observed events.
    ///
    /// May run any number of callbacks. An `Err` is fatal for the connection.
    fn service(&mut self, readiness: Readiness) -> Result<(), RemoteError>;

    /// Uid for subsequently submitted requests.
    fn set_uid(&mut self, uid: u32);

    /// Gid for subsequently submitted requests.
    fn set_gid(&mut self, gid: u32);
}
