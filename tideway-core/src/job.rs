use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::update::{ChangeSpec, CommitEventMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    /// A state reported by a daemon that this build does not know. It is
    /// never stored and never transitions.
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::InProgress => "in-progress",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "in-progress" => Some(JobState::InProgress),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Jobs only move forward. A queued job may fail without being started.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::InProgress)
                | (JobState::Queued, JobState::Failed)
                | (JobState::InProgress, JobState::Succeeded)
                | (JobState::InProgress, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: ChangeSpec,
    pub state: JobState,
    pub result: Option<CommitEventMetadata>,
    pub error: Option<String>,
    pub submitted: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Job {
    pub fn new(spec: ChangeSpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            spec,
            state: JobState::Queued,
            result: None,
            error: None,
            submitted: now,
            updated: now,
        }
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            status_string: self.state,
            result: self
                .result
                .as_ref()
                .and_then(|result| serde_json::to_value(result).ok()),
            error: self.error.clone(),
        }
    }
}

/// What a job tracker tells pollers about a job. `result` is left opaque so
/// that clients notice when a daemon answers with a shape they don't know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status_string: JobState,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn queued() -> Self {
        Self {
            status_string: JobState::Queued,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{Cause, Change, PolicyUpdates};

    fn spec() -> ChangeSpec {
        ChangeSpec::new(Change::Policy(PolicyUpdates::new()), Cause::default())
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new(spec());

        assert_eq!(job.state, JobState::Queued);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert_eq!(job.submitted, job.updated);
    }

    #[test]
    fn test_transitions_only_move_forward() {
        use JobState::*;

        assert!(Queued.can_transition_to(InProgress));
        assert!(Queued.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!InProgress.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(!Succeeded.can_transition_to(Succeeded));
    }

    #[test]
    fn test_state_strings() {
        for state in [
            JobState::Queued,
            JobState::InProgress,
            JobState::Succeeded,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(state.as_str().to_string())
            );
        }
        assert_eq!(JobState::parse("done"), None);
        assert_eq!(JobState::parse("unknown"), None);
    }

    #[test]
    fn test_report_with_unfamiliar_state() {
        let report: JobStatusReport =
            serde_json::from_str(r#"{"status_string":"pending","result":null,"error":null}"#)
                .unwrap();
        assert_eq!(report.status_string, JobState::Unknown);
        assert!(!report.status_string.is_terminal());
        assert!(!JobState::Unknown.can_transition_to(JobState::InProgress));
    }

    #[test]
    fn test_report_carries_result_as_json() {
        let mut job = Job::new(spec());
        job.state = JobState::Succeeded;
        job.result = Some(CommitEventMetadata {
            revision: "deadbeef".to_string(),
            spec: None,
        });

        let report = job.report();
        assert_eq!(report.status_string, JobState::Succeeded);
        assert_eq!(report.result.unwrap()["revision"], "deadbeef");
    }
}
