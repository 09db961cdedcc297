use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::{debug, trace, warn};

use fusenfs_core::{
    Callback, Identity, Interest, Readiness, RemoteClient, RemoteError, RemoteRequest,
};

use crate::wire::{self, CallFrame, FrameReader, ReplyFrame};

const READ_CHUNK: usize = 64 * 1024;

/// Callback-driven client for a [`LoopbackServer`](crate::LoopbackServer).
///
/// All socket I/O happens inside [`service`](RemoteClient::service);
/// `submit` only queues the encoded frame.
pub struct LoopbackClient {
    stream: UnixStream,
    outbound: Vec<u8>,
    reader: FrameReader,
    inflight: HashMap<u64, Callback>,
    next_xid: u64,
    credentials: Identity,
    closed: Option<String>,
}

impl LoopbackClient {
    /// Take over a connected stream. The stream is switched to non-blocking.
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(LoopbackClient {
            stream,
            outbound: Vec::new(),
            reader: FrameReader::new(),
            inflight: HashMap::new(),
            next_xid: 1,
            credentials: Identity::new(0, 0),
            closed: None,
        })
    }

    /// Requests submitted whose reply has not arrived.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read everything available. Returns true on end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.reader.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(&mut self) -> Result<(), String> {
        while let Some(frame) = self.reader.next_frame::<ReplyFrame>() {
            let frame = frame.map_err(|e| format!("malformed reply: {e}"))?;
            match self.inflight.remove(&frame.xid) {
                Some(callback) => {
                    trace!(xid = frame.xid, ok = frame.result.is_ok(), "Reply received");
                    callback(frame.result.map_err(RemoteError::Status));
                }
                None => warn!(xid = frame.xid, "Reply for unknown call"),
            }
        }
        Ok(())
    }

    /// Fail every in-flight call and refuse further work.
    fn shut(&mut self, reason: String) -> RemoteError {
        debug!(reason = %reason, in_flight = self.inflight.len(), "Loopback connection closed");
        for (_, callback) in self.inflight.drain() {
            callback(Err(RemoteError::Connection(reason.clone())));
        }
        self.outbound.clear();
        self.closed = Some(reason.clone());
        RemoteError::Connection(reason)
    }
}

/// Rejects requests the server could never accept.
fn check_request(request: &RemoteRequest) -> Result<(), RemoteError> {
    for path in request.paths() {
        if !path.starts_with('/') {
            return Err(RemoteError::invalid(format!("path '{path}' is not absolute")));
        }
        if path.contains('\0') {
            return Err(RemoteError::invalid("path contains NUL"));
        }
    }
    match request {
        RemoteRequest::Symlink { target, .. } if target.is_empty() => {
            Err(RemoteError::invalid("empty symlink target"))
        }
        _ => Ok(()),
    }
}

impl RemoteClient for LoopbackClient {
    fn submit(&mut self, request: RemoteRequest, callback: Callback) -> Result<(), RemoteError> {
        if let Some(reason) = &self.closed {
            return Err(RemoteError::Connection(reason.clone()));
        }
        check_request(&request)?;

        let xid = self.next_xid;
        let frame = CallFrame {
            xid,
            credentials: self.credentials,
            request,
        };
        wire::encode(&frame, &mut self.outbound)
            .map_err(|e| RemoteError::invalid(format!("cannot encode request: {e}")))?;
        self.next_xid += 1;
        self.inflight.insert(xid, callback);
        Ok(())
    }

    fn which_events(&self) -> Interest {
        if self.outbound.is_empty() {
            Interest::READ
        } else {
            Interest::READ_WRITE
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn service(&mut self, readiness: Readiness) -> Result<(), RemoteError> {
        if let Some(reason) = &self.closed {
            return Err(RemoteError::Connection(reason.clone()));
        }

        if let Err(e) = self.flush() {
            return Err(self.shut(format!("write failed: {e}")));
        }

        if readiness.readable || readiness.hangup {
            let eof = match self.fill() {
                Ok(eof) => eof,
                Err(e) => return Err(self.shut(format!("read failed: {e}"))),
            };
            // Replies that arrived before the close still complete normally.
            if let Err(reason) = self.dispatch() {
                return Err(self.shut(reason));
            }
            if eof {
                return Err(self.shut("server closed connection".to_string()));
            }
        }
        Ok(())
    }

    fn set_uid(&mut self, uid: u32) {
        self.credentials.uid = uid;
    }

    fn set_gid(&mut self, gid: u32) {
        self.credentials.gid = gid;
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        if !self.inflight.is_empty() {
            self.shut("client dropped".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusenfs_core::RemoteReply;
    use parking_lot::Mutex;
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;

    type Seen = Arc<Mutex<Vec<Result<RemoteReply, RemoteError>>>>;

    fn recorder(seen: &Seen) -> Callback {
        let seen = Arc::clone(seen);
        Box::new(move |result| seen.lock().push(result))
    }

    fn all_ready() -> Readiness {
        Readiness {
            readable: true,
            writable: true,
            hangup: false,
        }
    }

    #[test]
    fn test_rejects_relative_paths() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = LoopbackClient::new(a).unwrap();
        let seen: Seen = Arc::default();

        let err = client
            .submit(
                RemoteRequest::Lstat {
                    path: "etc/passwd".to_string(),
                },
                recorder(&seen),
            )
            .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.which_events(), Interest::READ);
    }

    #[test]
    fn test_credentials_on_frame_and_reply_dispatch() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = LoopbackClient::new(a).unwrap();
        let seen: Seen = Arc::default();

        client.set_uid(42);
        client.set_gid(43);
        client
            .submit(
                RemoteRequest::Unlink {
                    path: "/x".to_string(),
                },
                recorder(&seen),
            )
            .unwrap();
        assert_eq!(client.which_events(), Interest::READ_WRITE);
        client.service(all_ready()).unwrap();
        assert_eq!(client.which_events(), Interest::READ);

        let mut peer = BufReader::new(b.try_clone().unwrap());
        let mut line = String::new();
        peer.read_line(&mut line).unwrap();
        let call: CallFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(call.credentials, Identity::new(42, 43));

        let mut out = Vec::new();
        wire::encode(
            &ReplyFrame {
                xid: call.xid,
                result: Err(libc::ENOENT),
            },
            &mut out,
        )
        .unwrap();
        (&b).write_all(&out).unwrap();

        while seen.lock().is_empty() {
            client.service(all_ready()).unwrap();
        }
        assert_eq!(
            seen.lock().as_slice(),
            &[Err(RemoteError::Status(libc::ENOENT))]
        );
    }

    #[test]
    fn test_eof_fails_in_flight_calls() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = LoopbackClient::new(a).unwrap();
        let seen: Seen = Arc::default();

        for path in ["/a", "/b"] {
            client
                .submit(
                    RemoteRequest::Rmdir {
                        path: path.to_string(),
                    },
                    recorder(&seen),
                )
                .unwrap();
        }
        drop(b);

        let err = client.service(all_ready()).unwrap_err();
        assert!(err.is_connection());
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| matches!(r, Err(RemoteError::Connection(_)))));
        drop(seen);

        let err = client
            .submit(
                RemoteRequest::Rmdir {
                    path: "/c".to_string(),
                },
                Box::new(|_| {}),
            )
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_drop_fails_in_flight_calls() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = LoopbackClient::new(a).unwrap();
        let seen: Seen = Arc::default();
        client
            .submit(
                RemoteRequest::Statvfs {
                    path: "/".to_string(),
                },
                recorder(&seen),
            )
            .unwrap();
        drop(client);
        assert_eq!(seen.lock().len(), 1);
    }
}
