use crate::api::{create_router, AppState};
use crate::registry::{DaemonRegistry, InMemoryRegistry, TenantId};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_PORT: u16 = 3030;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Tenant for requests and daemons that don't name one.
    pub default_tenant: TenantId,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            default_tenant: TenantId::default(),
        }
    }
}

pub struct TidewayServer {
    config: ServerConfig,
    registry: Arc<dyn DaemonRegistry>,
}

impl TidewayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(InMemoryRegistry::new()))
    }

    pub fn with_registry(config: ServerConfig, registry: Arc<dyn DaemonRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> Arc<dyn DaemonRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let state = AppState {
            registry: self.registry,
            default_tenant: self.config.default_tenant.clone(),
        };

        let app = create_router(state);

        info!("Server listening on {}", self.config.addr);
        info!("Default tenant: {}", self.config.default_tenant);

        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
