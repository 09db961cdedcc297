//! Path-based filesystem verbs on top of a [`RemoteSession`].
//!
//! Every verb takes the calling identity explicitly; credentials are
//! recomputed for each call since one mount serves many local users.

use std::sync::Arc;

use tracing::{debug, error, warn};

use fusenfs_core::{
    HandleTable, Identity, RemoteFh, RemoteReply, RemoteRequest, RemoteSession, Timespec,
};

use crate::error::{FuseError, FuseResult};
use crate::stat::{FileKind, FileStat, FsStats};

/// One entry handed to a [`NfsFsCore::readdir`] sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Remote inode number.
    pub ino: u64,
    pub kind: Option<FileKind>,
}

/// The filesystem verb adapter.
///
/// Open files are tracked in a [`HandleTable`]; the ids it hands out are
/// what the kernel stores as the per-open-file handle.
pub struct NfsFsCore {
    session: Arc<RemoteSession>,
    handles: HandleTable<RemoteFh>,
}

impl NfsFsCore {
    pub fn new(session: Arc<RemoteSession>) -> Self {
        NfsFsCore {
            session,
            handles: HandleTable::new(),
        }
    }

    pub fn session(&self) -> &Arc<RemoteSession> {
        &self.session
    }

    /// Open-file handles not yet released.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn call(&self, caller: Identity, request: RemoteRequest) -> FuseResult<RemoteReply> {
        Ok(self.session.call(caller, request, None)?)
    }

    fn call_bounded(
        &self,
        caller: Identity,
        request: RemoteRequest,
        limit: usize,
    ) -> FuseResult<RemoteReply> {
        Ok(self.session.call(caller, request, Some(limit))?)
    }

    fn call_done(&self, caller: Identity, request: RemoteRequest) -> FuseResult<()> {
        let op = request.name();
        match self.call(caller, request)? {
            RemoteReply::Done => Ok(()),
            _ => Err(FuseError::UnexpectedReply(op)),
        }
    }

    fn remote_fh(&self, fh: u64) -> FuseResult<RemoteFh> {
        self.handles.get(fh).ok_or(FuseError::BadHandle(fh))
    }

    // ============== Attributes ==============

    pub fn getattr(&self, caller: Identity, path: &str) -> FuseResult<FileStat> {
        debug!(path, "getattr");
        match self.call(caller, RemoteRequest::Lstat { path: path.to_string() })? {
            RemoteReply::Stat(st) => Ok(FileStat::from_remote(
                &st,
                self.session.identity(),
                caller,
            )),
            _ => Err(FuseError::UnexpectedReply("lstat")),
        }
    }

    pub fn chmod(&self, caller: Identity, path: &str, mode: u32) -> FuseResult<()> {
        debug!(path, mode = %format!("{mode:o}"), "chmod");
        self.call_done(
            caller,
            RemoteRequest::Chmod {
                path: path.to_string(),
                mode,
            },
        )
    }

    /// Change ownership. `None` leaves that id unchanged.
    pub fn chown(
        &self,
        caller: Identity,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FuseResult<()> {
        let mapper = self.session.identity();
        let uid = uid.map(|u| mapper.to_remote_uid(u));
        let gid = gid.map(|g| mapper.to_remote_gid(g));
        debug!(path, ?uid, ?gid, "chown");
        self.call_done(
            caller,
            RemoteRequest::Chown {
                path: path.to_string(),
                uid,
                gid,
            },
        )
    }

    pub fn truncate(&self, caller: Identity, path: &str, size: u64) -> FuseResult<()> {
        debug!(path, size, "truncate");
        self.call_done(
            caller,
            RemoteRequest::Truncate {
                path: path.to_string(),
                size,
            },
        )
    }

    pub fn utime(
        &self,
        caller: Identity,
        path: &str,
        atime: Timespec,
        mtime: Timespec,
    ) -> FuseResult<()> {
        debug!(path, "utime");
        self.call_done(
            caller,
            RemoteRequest::Utime {
                path: path.to_string(),
                atime,
                mtime,
            },
        )
    }

    // ============== Directories ==============

    /// Stream the entries of `path` into `sink`. The sink returns true to stop.
    pub fn readdir<F>(&self, caller: Identity, path: &str, mut sink: F) -> FuseResult<()>
    where
        F: FnMut(DirEntry) -> bool,
    {
        debug!(path, "readdir");
        let entries = match self.call(caller, RemoteRequest::Opendir { path: path.to_string() })? {
            RemoteReply::Dir(entries) => entries,
            _ => return Err(FuseError::UnexpectedReply("opendir")),
        };
        for entry in entries {
            let full = sink(DirEntry {
                kind: FileKind::from_mode(entry.mode),
                name: entry.name,
                ino: entry.ino,
            });
            if full {
                break;
            }
        }
        Ok(())
    }

    /// Create a directory, then set its mode.
    ///
    /// Not atomic: if setting the mode fails the directory stays behind with
    /// the server's default mode and the chmod error is returned.
    pub fn mkdir(&self, caller: Identity, path: &str, mode: u32) -> FuseResult<()> {
        debug!(path, mode = %format!("{mode:o}"), "mkdir");
        self.call_done(caller, RemoteRequest::Mkdir { path: path.to_string() })?;
        if let Err(e) = self.chmod(caller, path, mode) {
            warn!(path, error = %e, "mkdir: directory created but setting its mode failed");
            return Err(e);
        }
        Ok(())
    }

    pub fn rmdir(&self, caller: Identity, path: &str) -> FuseResult<()> {
        debug!(path, "rmdir");
        self.call_done(caller, RemoteRequest::Rmdir { path: path.to_string() })
    }

    // ============== Namespace ==============

    pub fn unlink(&self, caller: Identity, path: &str) -> FuseResult<()> {
        debug!(path, "unlink");
        self.call_done(caller, RemoteRequest::Unlink { path: path.to_string() })
    }

    pub fn mknod(&self, caller: Identity, path: &str, mode: u32, rdev: u64) -> FuseResult<()> {
        debug!(path, mode = %format!("{mode:o}"), rdev, "mknod");
        self.call_done(
            caller,
            RemoteRequest::Mknod {
                path: path.to_string(),
                mode,
                rdev,
            },
        )
    }

    /// Create `link` pointing at `target`.
    pub fn symlink(&self, caller: Identity, target: &str, link: &str) -> FuseResult<()> {
        debug!(link_target = target, link, "symlink");
        self.call_done(
            caller,
            RemoteRequest::Symlink {
                target: target.to_string(),
                link: link.to_string(),
            },
        )
    }

    /// Read a symlink target, at most `max` bytes of it.
    pub fn readlink(&self, caller: Identity, path: &str, max: usize) -> FuseResult<Vec<u8>> {
        debug!(path, max, "readlink");
        match self.call_bounded(caller, RemoteRequest::Readlink { path: path.to_string() }, max)? {
            RemoteReply::Link(target) => Ok(target),
            _ => Err(FuseError::UnexpectedReply("readlink")),
        }
    }

    pub fn rename(&self, caller: Identity, from: &str, to: &str) -> FuseResult<()> {
        debug!(from, to, "rename");
        self.call_done(
            caller,
            RemoteRequest::Rename {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    /// Hard link `to` to the existing `from`.
    pub fn link(&self, caller: Identity, from: &str, to: &str) -> FuseResult<()> {
        debug!(from, to, "link");
        self.call_done(
            caller,
            RemoteRequest::Link {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    // ============== Open Files ==============

    /// Open `path` and return the handle id for later I/O.
    pub fn open(&self, caller: Identity, path: &str, flags: i32) -> FuseResult<u64> {
        debug!(path, flags, "open");
        match self.call(
            caller,
            RemoteRequest::Open {
                path: path.to_string(),
                flags,
            },
        )? {
            RemoteReply::Opened(fh) => Ok(self.handles.insert(fh)),
            _ => Err(FuseError::UnexpectedReply("open")),
        }
    }

    /// Create (or truncate) `path` and open it for writing.
    pub fn create(&self, caller: Identity, path: &str, mode: u32) -> FuseResult<u64> {
        debug!(path, mode = %format!("{mode:o}"), "create");
        match self.call(
            caller,
            RemoteRequest::Creat {
                path: path.to_string(),
                mode,
            },
        )? {
            RemoteReply::Opened(fh) => Ok(self.handles.insert(fh)),
            _ => Err(FuseError::UnexpectedReply("creat")),
        }
    }

    /// Release `fh`. The remote close is always issued for a live handle;
    /// its outcome is returned but the handle is gone either way.
    pub fn release(&self, caller: Identity, fh: u64) -> FuseResult<()> {
        debug!(fh, "release");
        let remote = self.handles.remove(fh).ok_or(FuseError::BadHandle(fh))?;
        let result = self.call_done(caller, RemoteRequest::Close { fh: remote });
        if let Err(e) = &result {
            error!(fh, error = %e, "release: remote close failed");
        }
        result
    }

    /// Read up to `size` bytes at `offset`.
    pub fn read(&self, caller: Identity, fh: u64, offset: u64, size: u32) -> FuseResult<Vec<u8>> {
        debug!(fh, offset, size, "read");
        let remote = self.remote_fh(fh)?;
        let request = RemoteRequest::Pread {
            fh: remote,
            offset,
            count: size,
        };
        match self.call_bounded(caller, request, size as usize)? {
            RemoteReply::Data(data) => Ok(data),
            _ => Err(FuseError::UnexpectedReply("pread")),
        }
    }

    /// Write `data` at `offset`, returning the number of bytes written.
    pub fn write(&self, caller: Identity, fh: u64, offset: u64, data: &[u8]) -> FuseResult<u32> {
        debug!(fh, offset, len = data.len(), "write");
        let remote = self.remote_fh(fh)?;
        let request = RemoteRequest::Pwrite {
            fh: remote,
            offset,
            data: data.to_vec(),
        };
        match self.call(caller, request)? {
            // Never report more than was handed in.
            RemoteReply::Written(n) => Ok(n.min(data.len() as u32)),
            _ => Err(FuseError::UnexpectedReply("pwrite")),
        }
    }

    pub fn fsync(&self, caller: Identity, fh: u64) -> FuseResult<()> {
        debug!(fh, "fsync");
        let remote = self.remote_fh(fh)?;
        self.call_done(caller, RemoteRequest::Fsync { fh: remote })
    }

    // ============== Filesystem ==============

    pub fn statfs(&self, caller: Identity, path: &str) -> FuseResult<FsStats> {
        debug!(path, "statfs");
        match self.call(caller, RemoteRequest::Statvfs { path: path.to_string() })? {
            RemoteReply::StatVfs(st) => Ok(FsStats::from(&st)),
            _ => Err(FuseError::UnexpectedReply("statvfs")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusenfs_core::{
        Callback, CredentialOverride, IdentityMapper, Interest, Readiness, RemoteClient,
        RemoteError,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<RemoteRequest>>>;

    /// Client answering requests from a fixed script of replies, in order,
    /// and recording every request it was given.
    struct ScriptedClient {
        sock: UnixStream,
        _peer: UnixStream,
        replies: VecDeque<Result<RemoteReply, RemoteError>>,
        queue: VecDeque<(Callback, Result<RemoteReply, RemoteError>)>,
        log: Log,
    }

    impl RemoteClient for ScriptedClient {
        fn submit(&mut self, request: RemoteRequest, callback: Callback) -> Result<(), RemoteError> {
            let reply = self
                .replies
                .pop_front()
                .unwrap_or(Err(RemoteError::Status(libc::ENOSYS)));
            self.log.lock().push(request);
            self.queue.push_back((callback, reply));
            Ok(())
        }

        fn which_events(&self) -> Interest {
            Interest::READ_WRITE
        }

        fn as_raw_fd(&self) -> RawFd {
            self.sock.as_raw_fd()
        }

        fn service(&mut self, _readiness: Readiness) -> Result<(), RemoteError> {
            if let Some((callback, reply)) = self.queue.pop_front() {
                callback(reply);
            }
            Ok(())
        }

        fn set_uid(&mut self, _uid: u32) {}

        fn set_gid(&mut self, _gid: u32) {}
    }

    const CALLER: Identity = Identity::new(1000, 1000);

    fn core_with(replies: Vec<Result<RemoteReply, RemoteError>>) -> (NfsFsCore, Log) {
        let (sock, peer) = UnixStream::pair().unwrap();
        let log: Log = Arc::default();
        let client = ScriptedClient {
            sock,
            _peer: peer,
            replies: replies.into(),
            queue: VecDeque::new(),
            log: Arc::clone(&log),
        };
        let session = RemoteSession::new(
            "mem://scripted/",
            Box::new(client),
            IdentityMapper::new(
                CredentialOverride::Fixed(Identity::new(65534, 65534).into()),
                CALLER,
            ),
            Duration::from_millis(5),
        );
        (NfsFsCore::new(Arc::new(session)), log)
    }

    fn ops(log: &Log) -> Vec<&'static str> {
        log.lock().iter().map(|r| r.name()).collect()
    }

    // ============== mkdir Composite ==============

    #[test]
    fn test_mkdir_then_chmod() {
        let (core, log) = core_with(vec![Ok(RemoteReply::Done), Ok(RemoteReply::Done)]);
        core.mkdir(CALLER, "/d", 0o750).unwrap();
        assert_eq!(ops(&log), vec!["mkdir", "chmod"]);
        assert!(matches!(
            log.lock()[1],
            RemoteRequest::Chmod { mode: 0o750, .. }
        ));
    }

    #[test]
    fn test_mkdir_reports_chmod_failure() {
        let (core, log) = core_with(vec![
            Ok(RemoteReply::Done),
            Err(RemoteError::Status(libc::EPERM)),
        ]);
        let err = core.mkdir(CALLER, "/d", 0o700).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
        assert_eq!(ops(&log), vec!["mkdir", "chmod"]);
    }

    #[test]
    fn test_mkdir_failure_skips_chmod() {
        let (core, log) = core_with(vec![Err(RemoteError::Status(libc::EEXIST))]);
        assert_eq!(core.mkdir(CALLER, "/d", 0o700).unwrap_err().to_errno(), libc::EEXIST);
        assert_eq!(ops(&log), vec!["mkdir"]);
    }

    // ============== Buffer Bounds ==============

    #[test]
    fn test_read_never_exceeds_requested_size() {
        let (core, _) = core_with(vec![
            Ok(RemoteReply::Opened(RemoteFh(5))),
            Ok(RemoteReply::Data(vec![0xab; 1 << 16])),
        ]);
        let fh = core.open(CALLER, "/f", libc::O_RDONLY).unwrap();
        let data = core.read(CALLER, fh, 0, 10).unwrap();
        assert_eq!(data.len(), 10);
    }

    #[test]
    fn test_readlink_never_exceeds_max() {
        let (core, _) = core_with(vec![Ok(RemoteReply::Link(vec![b'x'; 8192]))]);
        let target = core.readlink(CALLER, "/l", 64).unwrap();
        assert_eq!(target.len(), 64);
    }

    #[test]
    fn test_write_count_bounded_by_input() {
        let (core, _) = core_with(vec![
            Ok(RemoteReply::Opened(RemoteFh(5))),
            Ok(RemoteReply::Written(4096)),
        ]);
        let fh = core.open(CALLER, "/f", libc::O_WRONLY).unwrap();
        assert_eq!(core.write(CALLER, fh, 0, b"abc").unwrap(), 3);
    }

    // ============== Handles ==============

    #[test]
    fn test_release_issues_close_even_when_it_fails() {
        let (core, log) = core_with(vec![
            Ok(RemoteReply::Opened(RemoteFh(9))),
            Err(RemoteError::Status(libc::EIO)),
        ]);
        let fh = core.open(CALLER, "/f", libc::O_RDONLY).unwrap();
        assert_eq!(core.open_handles(), 1);

        assert!(core.release(CALLER, fh).is_err());
        assert_eq!(core.open_handles(), 0);
        assert_eq!(ops(&log), vec!["open", "close"]);
        assert!(matches!(log.lock()[1], RemoteRequest::Close { fh: RemoteFh(9) }));

        // Second release never reaches the remote.
        assert_eq!(core.release(CALLER, fh).unwrap_err().to_errno(), libc::EBADF);
        assert_eq!(ops(&log).len(), 2);
    }

    #[test]
    fn test_io_on_unknown_handle() {
        let (core, log) = core_with(vec![]);
        assert_eq!(core.read(CALLER, 77, 0, 1).unwrap_err().to_errno(), libc::EBADF);
        assert_eq!(core.write(CALLER, 77, 0, b"x").unwrap_err().to_errno(), libc::EBADF);
        assert_eq!(core.fsync(CALLER, 77).unwrap_err().to_errno(), libc::EBADF);
        assert!(log.lock().is_empty());
    }

    // ============== Identity ==============

    #[test]
    fn test_chown_maps_mount_ids_to_override() {
        let (core, log) = core_with(vec![Ok(RemoteReply::Done), Ok(RemoteReply::Done)]);
        core.chown(CALLER, "/f", Some(CALLER.uid), None).unwrap();
        core.chown(CALLER, "/f", Some(4321), Some(CALLER.gid)).unwrap();

        let log = log.lock();
        assert!(matches!(
            log[0],
            RemoteRequest::Chown { uid: Some(65534), gid: None, .. }
        ));
        assert!(matches!(
            log[1],
            RemoteRequest::Chown { uid: Some(4321), gid: Some(65534), .. }
        ));
    }

    #[test]
    fn test_unexpected_reply_is_eio() {
        let (core, _) = core_with(vec![Ok(RemoteReply::Done)]);
        assert_eq!(core.getattr(CALLER, "/").unwrap_err().to_errno(), libc::EIO);
    }

    #[test]
    fn test_readdir_sink_can_stop() {
        let entries = (0..5)
            .map(|i| fusenfs_core::RemoteDirEntry {
                name: format!("e{i}"),
                ino: i + 10,
                mode: libc::S_IFREG | 0o644,
            })
            .collect();
        let (core, _) = core_with(vec![Ok(RemoteReply::Dir(entries))]);

        let mut seen = Vec::new();
        core.readdir(CALLER, "/", |entry| {
            seen.push(entry.name);
            seen.len() == 2
        })
        .unwrap();
        assert_eq!(seen, vec!["e0", "e1"]);
    }
}
