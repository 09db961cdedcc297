//! Newline-delimited JSON framing between the loopback client and server.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fusenfs_core::{Identity, RemoteReply, RemoteRequest};

/// A request on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub xid: u64,
    pub credentials: Identity,
    pub request: RemoteRequest,
}

/// The answer to the call with the same `xid`. Errors carry a positive errno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub xid: u64,
    pub result: Result<RemoteReply, i32>,
}

/// Append `frame` and its terminating newline to `out`.
pub fn encode<T: Serialize>(frame: &T, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    serde_json::to_writer(&mut *out, frame)?;
    out.push(b'\n');
    Ok(())
}

/// Accumulates bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, if one has fully arrived.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Option<Result<T, serde_json::Error>> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(serde_json::from_slice(&line[..end]))
    }

    /// Bytes received that do not yet form a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
