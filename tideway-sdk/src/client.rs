use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tideway_core::{
    Cause, ImageStatus, JobId, JobStatusReport, PolicyUpdates, ReleaseSpec, ServiceStatus,
};
use tracing::debug;

use crate::error::{ClientError, Result};

pub use tideway_core::TENANT_HEADER;

/// What pollers need from a job tracker.
pub trait ClientService {
    fn job_status(&self, job: &JobId) -> Result<JobStatusReport>;

    /// Revisions up to `reference` not yet applied.
    fn sync_status(&self, reference: &str) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct UpdateImagesRequest<'a> {
    spec: &'a ReleaseSpec,
    cause: &'a Cause,
}

#[derive(Serialize)]
struct UpdatePoliciesRequest<'a> {
    updates: &'a PolicyUpdates,
    cause: &'a Cause,
}

#[derive(Clone)]
pub struct TidewayClient {
    base_url: String,
    tenant: Option<String>,
    client: Client,
}

impl TidewayClient {
    /// Create a client for the server at `base_url`
    /// (e.g. "http://localhost:3030").
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: None,
            client: Client::new(),
        }
    }

    /// Act for `tenant` rather than the server's default one.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check server health
    pub fn health_check(&self) -> Result<bool> {
        let response = self.request(Method::GET, "/health").send()?;
        Ok(response.status().is_success())
    }

    /// Check that the tenant's daemon is connected and answering.
    pub fn ping(&self) -> Result<()> {
        self.send(self.request(Method::GET, "/v6/ping"))?;
        Ok(())
    }

    pub fn list_services(&self, namespace: Option<&str>) -> Result<Vec<ServiceStatus>> {
        let mut request = self.request(Method::GET, "/v6/services");
        if let Some(namespace) = namespace {
            request = request.query(&[("namespace", namespace)]);
        }
        self.json(request)
    }

    /// Images used by `service`, or by every service, and what could
    /// replace them.
    pub fn list_images(&self, service: Option<&str>) -> Result<Vec<ImageStatus>> {
        let mut request = self.request(Method::GET, "/v6/images");
        if let Some(service) = service {
            request = request.query(&[("service", service)]);
        }
        self.json(request)
    }

    /// The config the daemon is applying.
    pub fn export(&self) -> Result<String> {
        Ok(self.send(self.request(Method::GET, "/v6/export"))?.text()?)
    }

    /// Queue an image release and return the job tracking it.
    pub fn update_images(&self, spec: &ReleaseSpec, cause: &Cause) -> Result<JobId> {
        let body = UpdateImagesRequest { spec, cause };
        self.json(self.request(Method::POST, "/v6/update-images").json(&body))
    }

    /// Queue policy changes and return the job tracking them.
    pub fn update_policies(&self, updates: &PolicyUpdates, cause: &Cause) -> Result<JobId> {
        let body = UpdatePoliciesRequest { updates, cause };
        self.json(self.request(Method::POST, "/v6/update-policies").json(&body))
    }

    /// Ask the daemon to sync now.
    pub fn sync_notify(&self) -> Result<()> {
        self.send(self.request(Method::POST, "/v6/sync-notify"))?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.tenant {
            Some(tenant) => request.header(TENANT_HEADER, tenant),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<reqwest::blocking::Response> {
        let response = request.send()?;
        let status = response.status();
        debug!(%status, url = %response.url(), "response");
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self.send(request)?.json()?)
    }
}

impl ClientService for TidewayClient {
    fn job_status(&self, job: &JobId) -> Result<JobStatusReport> {
        self.json(self.request(Method::GET, &format!("/v6/jobs/{job}")))
    }

    fn sync_status(&self, reference: &str) -> Result<Vec<String>> {
        self.json(self.request(Method::GET, &format!("/v6/sync/{reference}")))
    }
}
