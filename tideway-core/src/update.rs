use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Selects every service in a release.
pub const ALL_SERVICES: &str = "<all>";
/// Releases the newest available image for each selected service.
pub const ALL_LATEST: &str = "<all latest>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    /// Work out what would change without committing.
    Plan,
    #[default]
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub services: Vec<String>,
    pub image: String,
    #[serde(default)]
    pub kind: ReleaseKind,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: BTreeSet<String>,
}

/// Policy changes keyed by service id.
pub type PolicyUpdates = BTreeMap<String, PolicyUpdate>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec", rename_all = "snake_case")]
pub enum Change {
    Image(ReleaseSpec),
    Policy(PolicyUpdates),
}

/// A requested change to the config repo, as carried in jobs and notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSpec {
    #[serde(default)]
    pub cause: Cause,
    pub change: Change,
}

impl ChangeSpec {
    pub fn new(change: Change, cause: Cause) -> Self {
        Self { cause, change }
    }

    pub fn commit_message(&self) -> String {
        if !self.cause.message.is_empty() {
            return self.cause.message.clone();
        }
        match &self.change {
            Change::Image(release) => {
                let services = if release.services.iter().any(|s| s == ALL_SERVICES) {
                    "all services".to_string()
                } else {
                    release.services.join(", ")
                };
                format!("Release {} to {}", release.image, services)
            }
            Change::Policy(updates) => {
                let services: Vec<&str> = updates.keys().map(String::as_str).collect();
                format!("Update policies for {}", services.join(", "))
            }
        }
    }
}

/// Result of a job that went through the config repo.
///
/// An empty `revision` means the job had nothing to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEventMetadata {
    #[serde(alias = "reference")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ChangeSpec>,
}

impl CommitEventMetadata {
    pub fn short_revision(&self) -> &str {
        self.revision.get(..7).unwrap_or(&self.revision)
    }
}
