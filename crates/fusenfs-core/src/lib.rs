//! Synchronous request bridge between kernel filesystem threads and a
//! single-connection, callback-driven remote filesystem client.
//!
//! Many threads call [`RemoteSession::call`] concurrently. Each call gets a
//! [`CompletionSlot`]; the [`DriveLoop`] lets exactly one thread at a time
//! advance the client's connection, and whichever thread drives it runs the
//! completion callbacks of every caller. Outgoing credentials come from the
//! [`IdentityMapper`].

mod client;
mod drive;
mod error;
mod handles;
mod identity;
mod session;
mod slot;
pub mod types;

pub use client::{Callback, Interest, Readiness, RemoteClient};
pub use drive::{DriveLoop, DriveStats, DriveStatsSnapshot};
pub use error::RemoteError;
pub use handles::HandleTable;
pub use identity::{CredentialOverride, IdentityMapper, OverrideIds};
pub use session::RemoteSession;
pub use slot::{CallResult, CompletionSlot, PendingCall};
pub use types::*;
