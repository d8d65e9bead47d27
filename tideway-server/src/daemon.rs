//! The daemon's side of a connection: a [`Platform`] answered from the
//! config repo, the job tracker and the cluster.
//!
//! Run it with [`serve`](crate::remote::serve) over the daemon's end of a
//! connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tideway_core::{
    ChangeSpec, Checkout, Cluster, Error, ImageStatus, JobId, JobStatusReport, JobStore, JobWorker,
    ManifestEditor, ServiceStatus,
};
use tracing::info;

use crate::remote::{ErrorKind, Platform, RemoteError};

const SYNC_MESSAGE: &str = "Sync pointer";

pub struct Daemon<E, K> {
    inner: Arc<Inner<E, K>>,
}

struct Inner<E, K> {
    jobs: Arc<Mutex<JobStore>>,
    worker: JobWorker<E>,
    checkout: Mutex<Checkout>,
    cluster: K,
}

impl<E, K> Daemon<E, K>
where
    E: ManifestEditor + Send + Sync + 'static,
    K: Cluster + 'static,
{
    pub fn new(checkout: Checkout, jobs: JobStore, editor: E, cluster: K) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let worker = JobWorker::new(Arc::clone(&jobs), editor);
        Self {
            inner: Arc::new(Inner {
                jobs,
                worker,
                checkout: Mutex::new(checkout),
                cluster,
            }),
        }
    }

    /// Run `f` on the blocking pool; git and SQLite calls block.
    async fn blocking<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner<E, K>) -> tideway_core::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|err| RemoteError::Fatal(format!("daemon task failed: {err}")))?
            .map_err(remote_error)
    }
}

impl<E: ManifestEditor, K: Cluster> Inner<E, K> {
    fn jobs(&self) -> MutexGuard<'_, JobStore> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> MutexGuard<'_, Checkout> {
        self.checkout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every queued job, then apply the head of the repo to the cluster
    /// and move the sync tag there.
    fn sync(&self) -> tideway_core::Result<()> {
        let checkout = self.checkout();
        while self.worker.process_next(&checkout)?.is_some() {}

        checkout.pull()?;
        let head = checkout.head_revision()?;
        self.cluster.apply(&checkout.manifest_dir())?;
        checkout.move_tag_and_push(&head, SYNC_MESSAGE)?;

        info!(revision = %head, "synced cluster");
        Ok(())
    }
}

fn remote_error(err: Error) -> RemoteError {
    match err {
        Error::JobNotFound(job) => RemoteError::Application {
            kind: ErrorKind::User,
            message: format!("unknown job {job}"),
            help: Some("check the job id".to_string()),
        },
        Error::NoRepo => RemoteError::application(ErrorKind::Missing, Error::NoRepo.to_string()),
        err => RemoteError::application(ErrorKind::Server, err.to_string()),
    }
}

#[async_trait]
impl<E, K> Platform for Daemon<E, K>
where
    E: ManifestEditor + Send + Sync + 'static,
    K: Cluster + 'static,
{
    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, RemoteError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    async fn list_services(
        &self,
        namespace: Option<String>,
    ) -> Result<Vec<ServiceStatus>, RemoteError> {
        self.blocking(move |daemon| daemon.cluster.services(namespace.as_deref()))
            .await
    }

    async fn list_images(
        &self,
        service: Option<String>,
    ) -> Result<Vec<ImageStatus>, RemoteError> {
        self.blocking(move |daemon| daemon.cluster.images(service.as_deref()))
            .await
    }

    async fn export(&self) -> Result<String, RemoteError> {
        self.blocking(|daemon| daemon.checkout().export_manifests()).await
    }

    async fn update_manifests(&self, spec: ChangeSpec) -> Result<JobId, RemoteError> {
        self.blocking(move |daemon| daemon.jobs().submit(spec)).await
    }

    async fn sync_notify(&self) -> Result<(), RemoteError> {
        self.blocking(|daemon| daemon.sync()).await
    }

    async fn job_status(&self, job: JobId) -> Result<JobStatusReport, RemoteError> {
        self.blocking(move |daemon| daemon.jobs().status(&job)).await
    }

    async fn sync_status(&self, reference: String) -> Result<Vec<String>, RemoteError> {
        self.blocking(move |daemon| daemon.checkout().outstanding_revisions(&reference))
            .await
    }
}
