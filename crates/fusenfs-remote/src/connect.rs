use std::io;

use tracing::info;

use fusenfs_config::{RemoteTarget, TargetScheme};
use fusenfs_core::{Identity, RemoteClient};

use crate::export::MemExport;
use crate::server::{LoopbackHandle, LoopbackServer};

/// Errors establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{0}:// targets need an external transport, which this build does not include")]
    Unsupported(&'static str),

    #[error("Failed to connect: {0}")]
    Io(#[from] io::Error),
}

/// A connected client plus whatever keeps its server alive.
pub struct Connection {
    pub client: Box<dyn RemoteClient>,
    /// Present for in-process exports.
    pub server: Option<LoopbackHandle>,
}

/// Connect to `target`. In-process exports are owned by `owner`.
pub fn connect(target: &RemoteTarget, owner: Identity) -> Result<Connection, ConnectError> {
    match target.scheme {
        TargetScheme::Mem => {
            let (client, handle) = LoopbackServer::spawn(MemExport::new(owner))?;
            info!(export = %target, "Started in-process export");
            Ok(Connection {
                client: Box::new(client),
                server: Some(handle),
            })
        }
        TargetScheme::Nfs => Err(ConnectError::Unsupported(target.scheme.as_str())),
    }
}
