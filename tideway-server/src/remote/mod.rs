//! What a connected daemon can do, and the wire protocols that carry it.
//!
//! Daemons dial in, but once connected the roles invert: the server calls
//! methods on the daemon. Every protocol generation exposes the same
//! [`Platform`] capability set; only the encoding on the wire differs.

pub mod codec;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tideway_core::{ChangeSpec, JobId, JobStatusReport};

pub use codec::{Codec, Method, V4Codec, V5Codec, V6Codec};
pub use rpc::{serve, ClientV4, ClientV5, ClientV6, Connection, FrameChannel, RpcClient};
pub use tideway_core::{ContainerImages, ImageStatus, ServiceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V4,
    V5,
    V6,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &str {
        match self {
            ProtocolVersion::V4 => "v4",
            ProtocolVersion::V5 => "v5",
            ProtocolVersion::V6 => "v6",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an application error is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The request was wrong.
    User,
    /// The daemon failed.
    Server,
    /// The daemon is missing something it needs, e.g. repo access.
    Missing,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("daemon disconnected")]
    Disconnected,

    /// Transport-level failure reported by the peer.
    #[error("{0}")]
    Fatal(String),

    #[error("{message}")]
    Application {
        kind: ErrorKind,
        message: String,
        help: Option<String>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn application(kind: ErrorKind, message: impl Into<String>) -> Self {
        RemoteError::Application {
            kind,
            message: message.into(),
            help: None,
        }
    }

    pub(crate) fn protocol(err: impl fmt::Display) -> Self {
        RemoteError::Protocol(err.to_string())
    }
}

/// The capability set of a connected daemon.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn version(&self) -> Result<String, RemoteError>;

    async fn list_services(
        &self,
        namespace: Option<String>,
    ) -> Result<Vec<ServiceStatus>, RemoteError>;

    /// Images used by `service`, or by every service when `None`, and the
    /// images that could replace them.
    async fn list_images(
        &self,
        service: Option<String>,
    ) -> Result<Vec<ImageStatus>, RemoteError>;

    /// The config the daemon is applying, as one YAML stream.
    async fn export(&self) -> Result<String, RemoteError>;

    /// Queue a change to the config repo and return the job tracking it.
    async fn update_manifests(&self, spec: ChangeSpec) -> Result<JobId, RemoteError>;

    /// Ask the daemon to sync with the repo now rather than on its timer.
    async fn sync_notify(&self) -> Result<(), RemoteError>;

    async fn job_status(&self, job: JobId) -> Result<JobStatusReport, RemoteError>;

    /// Revisions up to `reference` not yet applied; empty once applied.
    async fn sync_status(&self, reference: String) -> Result<Vec<String>, RemoteError>;
}

/// A [`Platform`] that owns a connection.
pub trait PlatformCloser: Platform {
    /// Tear the connection down. Safe to call more than once.
    fn close(&self);
}
