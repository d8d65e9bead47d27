use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tideway_core::{Cause, Change, ChangeSpec, JobId, JobStatusReport, PolicyUpdates, ReleaseSpec};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::register::register;
use crate::registry::{DaemonRegistry, TenantId};
use crate::remote::{
    ErrorKind, ImageStatus, Platform, ProtocolVersion, RemoteError, ServiceStatus,
};

pub use tideway_core::TENANT_HEADER;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn DaemonRegistry>,
    pub default_tenant: TenantId,
}

impl AppState {
    fn tenant(&self, headers: &HeaderMap) -> TenantId {
        headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(TenantId::from)
            .unwrap_or_else(|| self.default_tenant.clone())
    }

    fn daemon(&self, headers: &HeaderMap) -> Result<Arc<dyn Platform>, ApiError> {
        let tenant = self.tenant(headers);
        self.registry.get(&tenant).ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("no daemon connected for tenant {tenant}"),
            )
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v6/ping", get(ping))
        .route("/v6/services", get(list_services))
        .route("/v6/images", get(list_images))
        .route("/v6/export", get(export))
        .route("/v6/update-images", post(update_images))
        .route("/v6/update-policies", post(update_policies))
        .route("/v6/jobs/:id", get(job_status))
        .route("/v6/sync/:reference", get(sync_status))
        .route("/v6/sync-notify", post(sync_notify))
        .route("/v4/daemon", get(register_v4))
        .route("/v5/daemon", get(register_v5))
        .route("/v6/daemon", get(register_v6))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn remote_error(err: RemoteError) -> ApiError {
    let status = match &err {
        RemoteError::Disconnected => StatusCode::BAD_GATEWAY,
        RemoteError::Application {
            kind: ErrorKind::User,
            ..
        } => StatusCode::BAD_REQUEST,
        RemoteError::Application {
            kind: ErrorKind::Missing,
            ..
        } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    state
        .daemon(&headers)?
        .ping()
        .await
        .map_err(remote_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ServicesQuery {
    namespace: Option<String>,
}

async fn list_services(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    state
        .daemon(&headers)?
        .list_services(query.namespace)
        .await
        .map(Json)
        .map_err(remote_error)
}

#[derive(Deserialize)]
struct ImagesQuery {
    service: Option<String>,
}

async fn list_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ImagesQuery>,
) -> Result<Json<Vec<ImageStatus>>, ApiError> {
    state
        .daemon(&headers)?
        .list_images(query.service)
        .await
        .map(Json)
        .map_err(remote_error)
}

async fn export(State(state): State<AppState>, headers: HeaderMap) -> Result<String, ApiError> {
    state
        .daemon(&headers)?
        .export()
        .await
        .map_err(remote_error)
}

#[derive(Deserialize)]
struct UpdateImagesRequest {
    spec: ReleaseSpec,
    #[serde(default)]
    cause: Cause,
}

async fn update_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateImagesRequest>,
) -> Result<Json<JobId>, ApiError> {
    let spec = ChangeSpec::new(Change::Image(req.spec), req.cause);
    submit(&state, &headers, spec).await
}

#[derive(Deserialize)]
struct UpdatePoliciesRequest {
    updates: PolicyUpdates,
    #[serde(default)]
    cause: Cause,
}

async fn update_policies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdatePoliciesRequest>,
) -> Result<Json<JobId>, ApiError> {
    let spec = ChangeSpec::new(Change::Policy(req.updates), req.cause);
    submit(&state, &headers, spec).await
}

async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    spec: ChangeSpec,
) -> Result<Json<JobId>, ApiError> {
    state
        .daemon(headers)?
        .update_manifests(spec)
        .await
        .map(Json)
        .map_err(remote_error)
}

async fn job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobStatusReport>, ApiError> {
    state
        .daemon(&headers)?
        .job_status(JobId::from(id))
        .await
        .map(Json)
        .map_err(remote_error)
}

async fn sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    state
        .daemon(&headers)?
        .sync_status(reference)
        .await
        .map(Json)
        .map_err(remote_error)
}

async fn sync_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .daemon(&headers)?
        .sync_notify()
        .await
        .map_err(remote_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn register_v4(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, &headers, ProtocolVersion::V4, ws)
}

async fn register_v5(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, &headers, ProtocolVersion::V5, ws)
}

async fn register_v6(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, &headers, ProtocolVersion::V6, ws)
}

fn upgrade(
    state: AppState,
    headers: &HeaderMap,
    version: ProtocolVersion,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let tenant = state.tenant(headers);
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(%tenant, %version, error = %rejection, "daemon connection not upgraded");
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    ws.on_upgrade(move |socket| register(state.registry, tenant, version, socket))
}
