use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The job's own error message, unchanged.
    #[error("{0}")]
    JobFailed(String),

    #[error("unexpected job result: {0}")]
    UnexpectedResult(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
