//! # tideway-server
//!
//! Accepts daemon connections over websockets and exposes the daemons they
//! reach over a small HTTP API. [`Daemon`] is the other end: the platform a
//! daemon answers calls from.

pub mod api;
pub mod daemon;
pub mod register;
pub mod registry;
pub mod remote;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use daemon::Daemon;
pub use register::register;
pub use registry::{DaemonRegistry, InMemoryRegistry, Registration, TenantId, DEFAULT_TENANT};
pub use remote::{Platform, PlatformCloser, ProtocolVersion, RemoteError};
pub use server::{ServerConfig, TidewayServer};
