//! Following a submitted change until it is committed, and optionally until
//! the cluster has applied it.

use std::fmt;
use std::io::Write;

use serde_json::Value;
use tideway_core::{CommitEventMetadata, JobId, JobState};

use crate::backoff::Backoff;
use crate::client::ClientService;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Queued,
    NothingToDo,
    Pushed(CommitEventMetadata),
    Applied,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Queued => f.write_str("Job queued"),
            Progress::NothingToDo => f.write_str("Nothing to do"),
            Progress::Pushed(commit) => write!(f, "Commit pushed: {}", commit.short_revision()),
            Progress::Applied => f.write_str("Applied"),
        }
    }
}

/// Wait for `job` to finish and return what it committed.
pub fn await_job<S>(client: &S, job: &JobId, backoff: &Backoff) -> Result<CommitEventMetadata>
where
    S: ClientService + ?Sized,
{
    let mut result = None;
    backoff.poll(|| {
        let report = client.job_status(job)?;
        match report.status_string {
            JobState::Failed => Err(ClientError::JobFailed(
                report.error.unwrap_or_else(|| format!("job {job} failed")),
            )),
            JobState::Succeeded => {
                result = Some(commit_result(report.result)?);
                Ok(true)
            }
            JobState::Queued | JobState::InProgress | JobState::Unknown => Ok(false),
        }
    })?;
    result.ok_or_else(|| ClientError::UnexpectedResult("no result".to_string()))
}

fn commit_result(result: Option<Value>) -> Result<CommitEventMetadata> {
    let value = result.ok_or_else(|| ClientError::UnexpectedResult("missing".to_string()))?;
    serde_json::from_value(value.clone())
        .map_err(|e| ClientError::UnexpectedResult(format!("{value}: {e}")))
}

/// Wait until no revision up to `reference` is left to apply.
pub fn await_sync<S>(client: &S, reference: &str, backoff: &Backoff) -> Result<()>
where
    S: ClientService + ?Sized,
{
    backoff.poll(|| Ok(client.sync_status(reference)?.is_empty()))
}

/// Follow `job` through to its commit, and with `sync` through to the
/// commit being applied, reporting each step to `on_progress`.
pub fn watch_change<S, F>(
    client: &S,
    job: &JobId,
    sync: bool,
    backoff: &Backoff,
    mut on_progress: F,
) -> Result<()>
where
    S: ClientService + ?Sized,
    F: FnMut(&Progress),
{
    on_progress(&Progress::Queued);
    let commit = await_job(client, job, backoff)?;
    if commit.revision.is_empty() {
        on_progress(&Progress::NothingToDo);
        return Ok(());
    }

    let revision = commit.revision.clone();
    on_progress(&Progress::Pushed(commit));
    if !sync {
        return Ok(());
    }

    await_sync(client, &revision, backoff)?;
    on_progress(&Progress::Applied);
    Ok(())
}

/// [`watch_change`], writing each step to `out` as a line.
pub fn await_change<S, W>(
    out: &mut W,
    client: &S,
    job: &JobId,
    sync: bool,
    backoff: &Backoff,
) -> Result<()>
where
    S: ClientService + ?Sized,
    W: Write,
{
    let mut written = Ok(());
    watch_change(client, job, sync, backoff, |progress| {
        if written.is_ok() {
            written = writeln!(out, "{progress}");
        }
    })?;
    Ok(written?)
}
