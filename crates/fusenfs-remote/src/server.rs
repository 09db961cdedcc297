use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fusenfs_core::{Identity, RemoteReply, RemoteRequest};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::client::LoopbackClient;
use crate::export::MemExport;
use crate::wire::{self, CallFrame, ReplyFrame};

#[derive(Debug, Default)]
struct Gate {
    paused: bool,
    disconnected: bool,
}

#[derive(Debug, Default)]
struct Control {
    gate: Mutex<Gate>,
    changed: Condvar,
}

/// Serves a [`MemExport`] to one [`LoopbackClient`] from a background thread.
pub struct LoopbackServer;

impl LoopbackServer {
    /// Start a server thread for `export` and return the connected client.
    pub fn spawn(export: MemExport) -> io::Result<(LoopbackClient, LoopbackHandle)> {
        let export = Arc::new(Mutex::new(export));
        let served = Arc::clone(&export);
        Self::spawn_with(export, move |credentials, request| {
            served.lock().handle(credentials, request)
        })
    }

    fn spawn_with<F>(
        export: Arc<Mutex<MemExport>>,
        handler: F,
    ) -> io::Result<(LoopbackClient, LoopbackHandle)>
    where
        F: FnMut(Identity, RemoteRequest) -> Result<RemoteReply, i32> + Send + 'static,
    {
        let (client_side, server_side) = UnixStream::pair()?;
        let control = Arc::new(Control::default());

        // The thread owns the socket; the handle only keeps a clone to sever it.
        let stream = server_side.try_clone()?;
        let thread = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("loopback-server".to_string())
                .spawn(move || serve(server_side, handler, control))?
        };

        let client = LoopbackClient::new(client_side)?;
        let handle = LoopbackHandle {
            export,
            control,
            stream,
            thread: Some(thread),
        };
        Ok((client, handle))
    }
}

/// Shuts the connection down when the serving thread leaves, however it leaves.
struct Hangup(UnixStream);

impl Drop for Hangup {
    fn drop(&mut self) {
        let _ = self.0.shutdown(Shutdown::Both);
        debug!("Loopback server stopped");
    }
}

fn serve<F>(stream: UnixStream, mut handler: F, control: Arc<Control>)
where
    F: FnMut(Identity, RemoteRequest) -> Result<RemoteReply, i32>,
{
    let mut writer = match stream.try_clone() {
        Ok(writer) => Hangup(writer),
        Err(e) => {
            warn!(error = %e, "Loopback server could not clone its stream");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Loopback server read failed");
                break;
            }
        }

        {
            let mut gate = control.gate.lock();
            while gate.paused && !gate.disconnected {
                control.changed.wait(&mut gate);
            }
            if gate.disconnected {
                break;
            }
        }

        let call: CallFrame = match serde_json::from_str(&line) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, "Loopback server received a malformed frame");
                break;
            }
        };

        let op = call.request.name();
        trace!(xid = call.xid, op, "Serving call");
        let result = match panic::catch_unwind(AssertUnwindSafe(|| {
            handler(call.credentials, call.request)
        })) {
            Ok(result) => result,
            Err(_) => {
                error!(xid = call.xid, op, "Export panicked, closing the connection");
                break;
            }
        };
        let reply = ReplyFrame {
            xid: call.xid,
            result,
        };

        let mut out = Vec::new();
        if let Err(e) = wire::encode(&reply, &mut out) {
            warn!(error = %e, "Loopback server could not encode a reply");
            break;
        }
        if let Err(e) = writer.0.write_all(&out) {
            debug!(error = %e, "Loopback server write failed");
            break;
        }
    }
}

/// Control over a running loopback server.
///
/// Dropping the handle leaves the server running until the client goes away.
pub struct LoopbackHandle {
    export: Arc<Mutex<MemExport>>,
    control: Arc<Control>,
    stream: UnixStream,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackHandle {
    /// Shared view of the served export.
    pub fn export(&self) -> Arc<Mutex<MemExport>> {
        Arc::clone(&self.export)
    }

    /// Hold incoming calls unanswered until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.control.gate.lock().paused = true;
    }

    pub fn resume(&self) {
        self.control.gate.lock().paused = false;
        self.control.changed.notify_all();
    }

    /// Sever the connection. Unanswered calls never get a reply.
    pub fn disconnect(&mut self) {
        self.control.gate.lock().disconnected = true;
        self.control.changed.notify_all();
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
