//! Turns queued jobs into commits on the config repo.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::git::{Checkout, Note};
use crate::job::{Job, JobId};
use crate::storage::JobStore;
use crate::update::{Change, ChangeSpec, CommitEventMetadata, ReleaseKind};

/// Rewrites manifests to reflect a change.
pub trait ManifestEditor {
    fn apply(&self, manifest_dir: &Path, spec: &ChangeSpec) -> Result<()>;
}

impl<F> ManifestEditor for F
where
    F: Fn(&Path, &ChangeSpec) -> Result<()>,
{
    fn apply(&self, manifest_dir: &Path, spec: &ChangeSpec) -> Result<()> {
        self(manifest_dir, spec)
    }
}

pub struct JobWorker<E> {
    jobs: Arc<Mutex<JobStore>>,
    editor: E,
}

impl<E: ManifestEditor> JobWorker<E> {
    pub fn new(jobs: Arc<Mutex<JobStore>>, editor: E) -> Self {
        Self { jobs, editor }
    }

    /// Run the oldest queued job against `checkout`.
    ///
    /// The job is only marked succeeded once its commit has been pushed.
    /// Returns `None` when nothing is queued.
    pub fn process_next(&self, checkout: &Checkout) -> Result<Option<JobId>> {
        let Some(job) = self.jobs().claim_next()? else {
            return Ok(None);
        };

        match self.run(checkout, &job) {
            Ok(result) => {
                info!(job = %job.id, revision = %result.revision, "job succeeded");
                self.jobs().succeed(&job.id, &result)?;
            }
            Err(err) => {
                error!(job = %job.id, error = %err, "job failed");
                self.jobs().fail(&job.id, &err.to_string())?;
            }
        }
        Ok(Some(job.id))
    }

    fn run(&self, checkout: &Checkout, job: &Job) -> Result<CommitEventMetadata> {
        let mut working = checkout.working_clone()?;
        let outcome = self.commit(&working, job);
        working.clean();

        let revision = match outcome {
            Ok(revision) => revision,
            Err(Error::NoChanges) => String::new(),
            Err(err) => return Err(err),
        };

        if !revision.is_empty() {
            if let Err(err) = checkout.pull() {
                warn!(error = %err, "reference checkout did not catch up with push");
            }
        }

        Ok(CommitEventMetadata {
            revision,
            spec: Some(job.spec.clone()),
        })
    }

    fn commit(&self, working: &Checkout, job: &Job) -> Result<String> {
        self.editor.apply(&working.manifest_dir(), &job.spec)?;
        if is_plan(&job.spec) {
            return Err(Error::NoChanges);
        }

        let note = Note {
            job_id: job.id.clone(),
            spec: job.spec.clone(),
        };
        working.commit_and_push(&job.spec.commit_message(), Some(&note))
    }

    fn jobs(&self) -> MutexGuard<'_, JobStore> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_plan(spec: &ChangeSpec) -> bool {
    matches!(&spec.change, Change::Image(release) if release.kind == ReleaseKind::Plan)
}
