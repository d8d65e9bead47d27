use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobState, JobStatusReport};
use crate::update::{ChangeSpec, CommitEventMetadata};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

const JOB_COLUMNS: &str = "id, spec, state, result, error, submitted, updated";

/// Job tracker backed by SQLite.
///
/// `Connection` is not `Sync`; share it as `Arc<Mutex<JobStore>>`.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                spec TEXT NOT NULL,
                state TEXT NOT NULL,
                result TEXT,
                error TEXT,
                submitted TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state, submitted);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs(updated);
            "#,
        )?;

        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        if version.is_none() {
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Queue a change and return the id pollers use to follow it.
    pub fn submit(&self, spec: ChangeSpec) -> Result<JobId> {
        let job = Job::new(spec);
        self.conn.execute(
            "INSERT INTO jobs (id, spec, state, result, error, submitted, updated)
             VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?5)",
            params![
                job.id.as_str(),
                serde_json::to_string(&job.spec)?,
                job.state.as_str(),
                timestamp(&job.submitted),
                timestamp(&job.updated),
            ],
        )?;

        info!(job = %job.id, "job queued");
        Ok(job.id)
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.as_str()],
                job_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::JobNotFound(id.clone()))
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatusReport> {
        self.get(id).map(|job| job.report())
    }

    /// Take the oldest queued job and mark it in progress.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let next = self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1
                     ORDER BY submitted, rowid LIMIT 1"
                ),
                params![JobState::Queued.as_str()],
                job_from_row,
            )
            .optional()?;

        let Some(mut job) = next else {
            return Ok(None);
        };
        self.transition(&job.id, JobState::InProgress, None, None)?;
        job.state = JobState::InProgress;
        Ok(Some(job))
    }

    pub fn succeed(&self, id: &JobId, result: &CommitEventMetadata) -> Result<()> {
        self.transition(id, JobState::Succeeded, Some(result), None)
    }

    pub fn fail(&self, id: &JobId, error: &str) -> Result<()> {
        self.transition(id, JobState::Failed, None, Some(error))
    }

    /// Forget finished jobs last touched before `cutoff`. Returns how many
    /// were removed.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM jobs WHERE state IN (?1, ?2) AND updated < ?3",
            params![
                JobState::Succeeded.as_str(),
                JobState::Failed.as_str(),
                timestamp(&cutoff),
            ],
        )?;
        debug!(removed, "pruned finished jobs");
        Ok(removed)
    }

    fn transition(
        &self,
        id: &JobId,
        to: JobState,
        result: Option<&CommitEventMetadata>,
        error: Option<&str>,
    ) -> Result<()> {
        let from = self.get(id)?.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        let result = result.map(serde_json::to_string).transpose()?;
        // Guard on the state we checked so a racing writer can't be overwritten.
        let changed = self.conn.execute(
            "UPDATE jobs SET state = ?1, result = ?2, error = ?3, updated = ?4
             WHERE id = ?5 AND state = ?6",
            params![
                to.as_str(),
                result,
                error,
                timestamp(&Utc::now()),
                id.as_str(),
                from.as_str(),
            ],
        )?;
        if changed == 0 {
            let current = self.get(id)?.state;
            return Err(Error::InvalidTransition { from: current, to });
        }

        debug!(job = %id, %from, %to, "job transition");
        Ok(())
    }
}

// Fixed-width so that comparing the stored text orders by time.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let spec: String = row.get(1)?;
    let state: String = row.get(2)?;
    let result: Option<String> = row.get(3)?;
    let error: Option<String> = row.get(4)?;
    let submitted: String = row.get(5)?;
    let updated: String = row.get(6)?;

    Ok(Job {
        id: JobId::from(id),
        spec: serde_json::from_str(&spec).map_err(|e| conversion(1, e))?,
        state: JobState::parse(&state)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, "state".to_string(), Type::Text))?,
        result: result
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| conversion(3, e))?,
        error,
        submitted: parse_timestamp(5, &submitted)?,
        updated: parse_timestamp(6, &updated)?,
    })
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion(column, e))
}

fn conversion<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{Cause, Change, ReleaseKind, ReleaseSpec};
    use chrono::Duration;

    fn spec(image: &str) -> ChangeSpec {
        ChangeSpec::new(
            Change::Image(ReleaseSpec {
                services: vec!["default/app".to_string()],
                image: image.to_string(),
                kind: ReleaseKind::Execute,
                excludes: vec![],
            }),
            Cause::default(),
        )
    }

    fn pushed(revision: &str) -> CommitEventMetadata {
        CommitEventMetadata {
            revision: revision.to_string(),
            spec: None,
        }
    }

    #[test]
    fn test_store_initialization() {
        let store = JobStore::in_memory().unwrap();
        assert!(store.conn.is_autocommit());
    }

    #[test]
    fn test_submit_and_get() {
        let store = JobStore::in_memory().unwrap();
        let id = store.submit(spec("app:v2")).unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.spec, spec("app:v2"));
        assert_eq!(store.status(&id).unwrap(), JobStatusReport::queued());
    }

    #[test]
    fn test_unknown_job() {
        let store = JobStore::in_memory().unwrap();
        let err = store.get(&JobId::from("missing")).unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[test]
    fn test_claim_next_is_fifo() {
        let store = JobStore::in_memory().unwrap();
        let first = store.submit(spec("app:v2")).unwrap();
        let second = store.submit(spec("app:v3")).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.state, JobState::InProgress);
        assert_eq!(store.get(&first).unwrap().state, JobState::InProgress);

        assert_eq!(store.claim_next().unwrap().unwrap().id, second);
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_succeed_records_result() {
        let store = JobStore::in_memory().unwrap();
        let id = store.submit(spec("app:v2")).unwrap();
        store.claim_next().unwrap();
        store.succeed(&id, &pushed("deadbeef")).unwrap();

        let report = store.status(&id).unwrap();
        assert_eq!(report.status_string, JobState::Succeeded);
        assert_eq!(report.result.unwrap()["revision"], "deadbeef");
        assert!(report.error.is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let store = JobStore::in_memory().unwrap();
        let id = store.submit(spec("app:v2")).unwrap();
        store.fail(&id, "no such image").unwrap();

        let report = store.status(&id).unwrap();
        assert_eq!(report.status_string, JobState::Failed);
        assert_eq!(report.error.as_deref(), Some("no such image"));
    }

    #[test]
    fn test_transitions_never_go_back() {
        let store = JobStore::in_memory().unwrap();
        let id = store.submit(spec("app:v2")).unwrap();

        let err = store.succeed(&id, &pushed("deadbeef")).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: JobState::Queued,
                to: JobState::Succeeded
            }
        ));

        store.claim_next().unwrap();
        store.succeed(&id, &pushed("deadbeef")).unwrap();
        assert!(store.fail(&id, "late").is_err());
        assert!(store.succeed(&id, &pushed("cafebabe")).is_err());
        assert_eq!(
            store.get(&id).unwrap().result.unwrap().revision,
            "deadbeef"
        );
    }

    #[test]
    fn test_prune_only_removes_finished_jobs() {
        let store = JobStore::in_memory().unwrap();
        let done = store.submit(spec("app:v2")).unwrap();
        let waiting = store.submit(spec("app:v3")).unwrap();
        store.fail(&done, "boom").unwrap();

        let removed = store.prune(Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&done).is_err());
        assert!(store.get(&waiting).is_ok());

        assert_eq!(store.prune(Utc::now() - Duration::hours(1)).unwrap(), 0);
    }

    #[test]
    fn test_jobs_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");

        let id = {
            let store = JobStore::new(&path).unwrap();
            store.submit(spec("app:v2")).unwrap()
        };

        let store = JobStore::new(&path).unwrap();
        assert_eq!(store.get(&id).unwrap().state, JobState::Queued);
    }
}
