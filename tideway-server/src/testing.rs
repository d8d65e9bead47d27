//! In-process stand-ins for a daemon and its connection.

use async_trait::async_trait;
use tideway_core::{ChangeSpec, CommitEventMetadata, JobId, JobState, JobStatusReport};
use tokio::sync::mpsc;

use crate::remote::{
    ContainerImages, ErrorKind, FrameChannel, ImageStatus, Platform, RemoteError, ServiceStatus,
};

/// One end of an in-memory frame pipe. Dropping an end hangs up on the
/// other.
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

pub fn channel_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryChannel {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl FrameChannel for MemoryChannel {
    async fn send_frame(&mut self, frame: String) -> Result<(), RemoteError> {
        self.tx
            .as_ref()
            .ok_or(RemoteError::Disconnected)?
            .send(frame)
            .map_err(|_| RemoteError::Disconnected)
    }

    async fn recv_frame(&mut self) -> Option<Result<String, RemoteError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn shutdown(&mut self) -> Result<(), RemoteError> {
        self.tx.take();
        Ok(())
    }
}

/// A daemon with canned answers.
#[derive(Debug, Clone, Default)]
pub struct FakeDaemon {
    pub name: String,
}

impl FakeDaemon {
    pub const VERSION: &'static str = "fake-1.0";
    pub const DONE_JOB: &'static str = "job-done";
    pub const UNKNOWN_JOB: &'static str = "job-unknown";
    pub const APPLIED_REF: &'static str = "applied";
    pub const EXPORT: &'static str = "---\nimage: app:v1\n";

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Platform for FakeDaemon {
    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, RemoteError> {
        Ok(Self::VERSION.to_string())
    }

    async fn list_services(
        &self,
        namespace: Option<String>,
    ) -> Result<Vec<ServiceStatus>, RemoteError> {
        let service = ServiceStatus {
            id: "default/app".to_string(),
            status: "ready".to_string(),
            images: vec!["app:v1".to_string()],
        };
        Ok(match namespace.as_deref() {
            None | Some("default") => vec![service],
            Some(_) => vec![],
        })
    }

    async fn list_images(
        &self,
        service: Option<String>,
    ) -> Result<Vec<ImageStatus>, RemoteError> {
        let status = ImageStatus {
            id: "default/app".to_string(),
            containers: vec![ContainerImages {
                name: "app".to_string(),
                current: "app:v1".to_string(),
                available: vec!["app:v2".to_string(), "app:v1".to_string()],
            }],
        };
        Ok(match service.as_deref() {
            None | Some("default/app") => vec![status],
            Some(_) => vec![],
        })
    }

    async fn export(&self) -> Result<String, RemoteError> {
        Ok(Self::EXPORT.to_string())
    }

    async fn update_manifests(&self, _spec: ChangeSpec) -> Result<JobId, RemoteError> {
        Ok(JobId::from(format!("job-{}", self.name)))
    }

    async fn sync_notify(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn job_status(&self, job: JobId) -> Result<JobStatusReport, RemoteError> {
        match job.as_str() {
            Self::DONE_JOB => Ok(JobStatusReport {
                status_string: JobState::Succeeded,
                result: serde_json::to_value(CommitEventMetadata {
                    revision: "deadbeefcafe".to_string(),
                    spec: None,
                })
                .ok(),
                error: None,
            }),
            Self::UNKNOWN_JOB => Err(RemoteError::Application {
                kind: ErrorKind::User,
                message: format!("unknown job {job}"),
                help: Some("check the job id".to_string()),
            }),
            _ => Ok(JobStatusReport::queued()),
        }
    }

    async fn sync_status(&self, reference: String) -> Result<Vec<String>, RemoteError> {
        if reference == Self::APPLIED_REF {
            Ok(vec![])
        } else {
            Ok(vec![reference])
        }
    }
}
