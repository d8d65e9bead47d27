use thiserror::Error;

use crate::git::exec::CommandError;
use crate::job::{JobId, JobState};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{context}: {source}")]
    Git {
        context: String,
        #[source]
        source: CommandError,
    },

    #[error("git repo has not been configured")]
    NoRepo,

    #[error("cloning {url}: {source}")]
    Cloning {
        url: String,
        #[source]
        source: CommandError,
    },

    #[error("pushing to {url}: {source}")]
    Push {
        url: String,
        #[source]
        source: CommandError,
    },

    #[error("no changes made in repo")]
    NoChanges,

    #[error("decoding note for {rev}: {source}")]
    NoteDecode {
        rev: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

impl Error {
    pub(crate) fn git(context: impl Into<String>, source: CommandError) -> Self {
        Error::Git {
            context: context.into(),
            source,
        }
    }

    /// `NoChanges` signals that there was nothing to commit, which callers
    /// treat as success.
    pub fn is_no_changes(&self) -> bool {
        matches!(self, Error::NoChanges)
    }
}
