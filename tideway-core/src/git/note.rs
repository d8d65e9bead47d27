use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::JobId;
use crate::update::ChangeSpec;

/// Why a commit exists: the job that produced it and what was asked for.
///
/// Stored as the JSON body of a git note on the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "JobID")]
    pub job_id: JobId,
    #[serde(rename = "Spec")]
    pub spec: ChangeSpec,
}

/// Side-channel metadata keyed by commit, at most one note per commit.
pub trait NoteStore {
    fn put(&self, rev: &str, note: &Note) -> Result<()>;

    /// `Ok(None)` when `rev` has no note.
    fn get(&self, rev: &str) -> Result<Option<Note>>;
}
