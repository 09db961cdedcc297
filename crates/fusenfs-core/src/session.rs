use std::time::Duration;

use tracing::info;

use crate::client::RemoteClient;
use crate::drive::{DriveLoop, DriveStatsSnapshot};
use crate::error::RemoteError;
use crate::identity::IdentityMapper;
use crate::slot::{CallResult, PendingCall};
use crate::types::{Identity, RemoteRequest};

/// One mounted remote export.
///
/// Owns the connection (through the [`DriveLoop`]) and the identity
/// configuration. Share it between kernel dispatch threads with `Arc`.
#[derive(Debug)]
pub struct RemoteSession {
    target: String,
    drive: DriveLoop,
    identity: IdentityMapper,
}

impl RemoteSession {
    /// Wrap an already connected client.
    pub fn new(
        target: impl Into<String>,
        client: Box<dyn RemoteClient>,
        identity: IdentityMapper,
        poll_timeout: Duration,
    ) -> Self {
        let target = target.into();
        info!(
            export = %target,
            credentials = ?identity.credentials(),
            mount_uid = identity.mount_identity().uid,
            mount_gid = identity.mount_identity().gid,
            "Remote session established"
        );
        RemoteSession {
            target,
            drive: DriveLoop::new(client, poll_timeout),
            identity,
        }
    }

    /// Perform `request` on behalf of `caller` and block for the result.
    pub fn call(
        &self,
        caller: Identity,
        request: RemoteRequest,
        limit: Option<usize>,
    ) -> CallResult {
        let credentials = self.identity.outgoing(caller);
        self.drive.call(credentials, request, limit)
    }

    /// Issue without waiting; pair with [`wait`](Self::wait).
    pub fn issue(
        &self,
        caller: Identity,
        request: RemoteRequest,
        limit: Option<usize>,
    ) -> Result<PendingCall, RemoteError> {
        self.drive.issue(self.identity.outgoing(caller), request, limit)
    }

    pub fn wait(&self, call: PendingCall) -> CallResult {
        self.drive.wait(call)
    }

    pub fn identity(&self) -> &IdentityMapper {
        &self.identity
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        !self.drive.is_failed()
    }

    pub fn stats(&self) -> DriveStatsSnapshot {
        self.drive.stats()
    }
}
