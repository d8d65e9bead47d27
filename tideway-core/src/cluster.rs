//! What a daemon reports about the workloads it runs, and the cluster it
//! keeps in step with the config repo.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImages {
    pub name: String,
    pub current: String,
    /// Images that could replace `current`, newest first.
    #[serde(default)]
    pub available: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStatus {
    pub id: String,
    #[serde(default)]
    pub containers: Vec<ContainerImages>,
}

/// The cluster a daemon runs in.
pub trait Cluster: Send + Sync {
    fn services(&self, namespace: Option<&str>) -> Result<Vec<ServiceStatus>>;

    /// Images used by `service`, or by every service when `None`.
    fn images(&self, service: Option<&str>) -> Result<Vec<ImageStatus>>;

    /// Make the cluster match the manifests under `manifest_dir`.
    fn apply(&self, manifest_dir: &Path) -> Result<()>;
}
