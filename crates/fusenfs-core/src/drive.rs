use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::client::{Readiness, RemoteClient};
use crate::error::RemoteError;
use crate::slot::{CallResult, CompletionSlot, PendingCall};
use crate::types::{Identity, RemoteRequest};

/// Counters describing drive loop activity.
#[derive(Debug, Default)]
pub struct DriveStats {
    issued: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    drive_steps: AtomicU64,
    connection_failures: AtomicU64,
}

/// Point-in-time copy of [`DriveStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveStatsSnapshot {
    pub issued: u64,
    pub rejected: u64,
    pub completed: u64,
    pub drive_steps: u64,
    pub connection_failures: u64,
}

impl DriveStats {
    pub fn snapshot(&self) -> DriveStatsSnapshot {
        DriveStatsSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            drive_steps: self.drive_steps.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
        }
    }
}

/// Everything guarded by the drive token.
struct DriveState {
    client: Box<dyn RemoteClient>,
    pending: HashMap<u64, Arc<CompletionSlot>>,
    next_id: u64,
    failure: Option<String>,
}

/// Serializes access to a non-reentrant [`RemoteClient`].
///
/// Any number of threads may issue calls and wait for them. Submitting a
/// request and advancing the connection both happen under one mutex (the
/// drive token), so at most one thread ever drives the client. A waiter
/// holds the token for at most one bounded `poll(2)` plus one service step,
/// then releases it and re-checks its own slot.
pub struct DriveLoop {
    state: Mutex<DriveState>,
    poll_timeout: Duration,
    stats: DriveStats,
}

impl DriveLoop {
    pub fn new(client: Box<dyn RemoteClient>, poll_timeout: Duration) -> Self {
        DriveLoop {
            state: Mutex::new(DriveState {
                client,
                pending: HashMap::new(),
                next_id: 1,
                failure: None,
            }),
            poll_timeout,
            stats: DriveStats::default(),
        }
    }

    /// Apply `credentials` and submit `request` as one step under the token.
    ///
    /// A request the client refuses is returned as an error and never
    /// enters the drive loop.
    pub fn issue(
        &self,
        credentials: Identity,
        request: RemoteRequest,
        limit: Option<usize>,
    ) -> Result<PendingCall, RemoteError> {
        let op = request.name();
        let mut state = self.state.lock();

        if let Some(reason) = &state.failure {
            return Err(RemoteError::Connection(reason.clone()));
        }

        state.client.set_uid(credentials.uid);
        state.client.set_gid(credentials.gid);

        let slot = Arc::new(CompletionSlot::new(limit));
        let target = Arc::clone(&slot);
        let submitted = state.client.submit(
            request,
            Box::new(move |result| {
                target.complete(result);
            }),
        );

        if let Err(e) = submitted {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(op, error = %e, "Remote client rejected request");
            return Err(e);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id, Arc::clone(&slot));
        self.stats.issued.fetch_add(1, Ordering::Relaxed);
        trace!(op, id, uid = credentials.uid, gid = credentials.gid, "Issued remote call");

        Ok(PendingCall { id, slot })
    }

    /// Block until `call` completes, driving the connection when needed.
    pub fn wait(&self, call: PendingCall) -> CallResult {
        loop {
            if let Some(result) = call.slot.take() {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                return result;
            }

            let mut state = self.state.lock();
            // Another driver may have completed us while we queued for the token.
            if call.slot.is_complete() {
                continue;
            }
            if let Some(reason) = &state.failure {
                // Failure drains the registry, so this only covers a slot
                // whose callback the client dropped without running.
                call.slot.complete(Err(RemoteError::Connection(reason.clone())));
                continue;
            }
            self.drive_step(&mut state);
        }
    }

    /// Issue `request` and wait for its result.
    pub fn call(
        &self,
        credentials: Identity,
        request: RemoteRequest,
        limit: Option<usize>,
    ) -> CallResult {
        let call = self.issue(credentials, request, limit)?;
        self.wait(call)
    }

    /// One poll + service round. Caller holds the token.
    fn drive_step(&self, state: &mut DriveState) {
        self.stats.drive_steps.fetch_add(1, Ordering::Relaxed);

        let readiness = match self.poll_client(state.client.as_ref()) {
            Ok(readiness) => readiness,
            Err(e) => {
                self.fail(state, format!("poll failed: {e}"));
                return;
            }
        };

        if let Err(e) = state.client.service(readiness) {
            self.fail(state, e.to_string());
            return;
        }

        state.pending.retain(|_, slot| !slot.is_complete());
    }

    fn poll_client(&self, client: &dyn RemoteClient) -> io::Result<Readiness> {
        let mut pfd = libc::pollfd {
            fd: client.as_raw_fd(),
            events: client.which_events().poll_events(),
            revents: 0,
        };
        let timeout_ms = self.poll_timeout.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;

        // SAFETY: pfd is a valid pollfd for the duration of the call and nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err);
        }
        Ok(Readiness::from_revents(pfd.revents))
    }

    /// Mark the connection dead and resolve every pending slot with `EIO`.
    fn fail(&self, state: &mut DriveState, reason: String) {
        warn!(
            reason = %reason,
            pending = state.pending.len(),
            "Remote connection failed"
        );
        self.stats.connection_failures.fetch_add(1, Ordering::Relaxed);
        for (_, slot) in state.pending.drain() {
            slot.complete(Err(RemoteError::Connection(reason.clone())));
        }
        state.failure = Some(reason);
    }

    /// Calls issued but not yet seen complete by a drive step.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Reason the connection failed, if it has.
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().failure.is_some()
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn stats(&self) -> DriveStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for DriveLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveLoop")
            .field("poll_timeout", &self.poll_timeout)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
