//! A concrete callback-driven remote client and an in-process export.
//!
//! [`LoopbackClient`] implements [`fusenfs_core::RemoteClient`] over a Unix
//! socket pair: requests are queued by `submit`, and all socket I/O plus
//! every completion callback happens inside `service`. [`LoopbackServer`]
//! answers those requests from a [`MemExport`] on its own thread.

mod client;
mod connect;
mod export;
mod server;
pub mod wire;

pub use client::LoopbackClient;
pub use connect::{connect, ConnectError, Connection};
pub use export::MemExport;
pub use server::{LoopbackHandle, LoopbackServer};
