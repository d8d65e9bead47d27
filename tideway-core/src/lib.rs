//! # tideway-core
//!
//! Core library for tideway - keeping a cluster in step with a git config repo.
//!
//! This crate owns the config repo side of the system: cloning and committing
//! through the `git` binary, provenance notes on commits, the sync tag, and the
//! job records that track requested changes until they land as commits.

pub mod cluster;
pub mod error;
pub mod git;
pub mod job;
pub mod storage;
pub mod update;
pub mod worker;

pub use cluster::{Cluster, ContainerImages, ImageStatus, ServiceStatus};
pub use error::{Error, Result};
pub use git::{Checkout, Config, Note, NoteStore, Repo};
pub use job::{Job, JobId, JobState, JobStatusReport};
pub use storage::JobStore;
pub use update::{
    Cause, Change, ChangeSpec, CommitEventMetadata, PolicyUpdate, PolicyUpdates, ReleaseKind,
    ReleaseSpec,
};
pub use worker::{JobWorker, ManifestEditor};

/// HTTP header naming the tenant a request acts for.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";
