//! Which daemon answers for which tenant.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::remote::{Platform, ProtocolVersion};

/// Tenant used when a request names none.
pub const DEFAULT_TENANT: &str = "<default>";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket for one connection's stay in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration(u64);

pub trait DaemonRegistry: Send + Sync {
    /// Make `platform` the daemon for `tenant`, replacing any earlier one.
    fn connect(
        &self,
        tenant: &TenantId,
        version: ProtocolVersion,
        platform: Arc<dyn Platform>,
    ) -> Registration;

    /// Forget `registration`. Does nothing if a newer connection has
    /// already replaced it.
    fn disconnect(&self, tenant: &TenantId, registration: Registration);

    fn get(&self, tenant: &TenantId) -> Option<Arc<dyn Platform>>;
}

struct Entry {
    registration: Registration,
    version: ProtocolVersion,
    platform: Arc<dyn Platform>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    next: AtomicU64,
    daemons: Mutex<HashMap<TenantId, Entry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocol spoken by the daemon currently connected for `tenant`.
    pub fn version(&self, tenant: &TenantId) -> Option<ProtocolVersion> {
        self.daemons().get(tenant).map(|entry| entry.version)
    }

    pub fn len(&self) -> usize {
        self.daemons().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn daemons(&self) -> MutexGuard<'_, HashMap<TenantId, Entry>> {
        self.daemons.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DaemonRegistry for InMemoryRegistry {
    fn connect(
        &self,
        tenant: &TenantId,
        version: ProtocolVersion,
        platform: Arc<dyn Platform>,
    ) -> Registration {
        let registration = Registration(self.next.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            registration,
            version,
            platform,
        };
        if let Some(previous) = self.daemons().insert(tenant.clone(), entry) {
            info!(%tenant, replaced = %previous.version, %version, "daemon replaced");
        }
        registration
    }

    fn disconnect(&self, tenant: &TenantId, registration: Registration) {
        let mut daemons = self.daemons();
        match daemons.get(tenant) {
            Some(entry) if entry.registration == registration => {
                daemons.remove(tenant);
            }
            _ => debug!(%tenant, "stale disconnect ignored"),
        }
    }

    fn get(&self, tenant: &TenantId) -> Option<Arc<dyn Platform>> {
        self.daemons()
            .get(tenant)
            .map(|entry| Arc::clone(&entry.platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDaemon;

    fn daemon(name: &str) -> Arc<dyn Platform> {
        Arc::new(FakeDaemon::named(name))
    }

    async fn name_of(platform: Arc<dyn Platform>) -> String {
        platform
            .update_manifests(tideway_core::ChangeSpec::new(
                tideway_core::Change::Policy(Default::default()),
                Default::default(),
            ))
            .await
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_default_tenant() {
        assert_eq!(TenantId::default().as_str(), "<default>");
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let registry = InMemoryRegistry::new();
        let tenant = TenantId::from("acme");
        assert!(registry.get(&tenant).is_none());

        let registration = registry.connect(&tenant, ProtocolVersion::V6, daemon("a"));
        assert_eq!(registry.version(&tenant), Some(ProtocolVersion::V6));
        assert_eq!(name_of(registry.get(&tenant).unwrap()).await, "job-a");

        registry.disconnect(&tenant, registration);
        assert!(registry.get(&tenant).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_last_connection_wins() {
        let registry = InMemoryRegistry::new();
        let tenant = TenantId::from("acme");

        let first = registry.connect(&tenant, ProtocolVersion::V4, daemon("old"));
        let second = registry.connect(&tenant, ProtocolVersion::V6, daemon("new"));
        assert_ne!(first, second);
        assert_eq!(name_of(registry.get(&tenant).unwrap()).await, "job-new");

        // The replaced connection going away must not evict its successor.
        registry.disconnect(&tenant, first);
        assert_eq!(registry.version(&tenant), Some(ProtocolVersion::V6));

        registry.disconnect(&tenant, second);
        assert!(registry.get(&tenant).is_none());
    }

    #[test]
    fn test_tenants_are_independent() {
        let registry = InMemoryRegistry::new();
        let acme = TenantId::from("acme");
        let initech = TenantId::from("initech");

        let registration = registry.connect(&acme, ProtocolVersion::V5, daemon("a"));
        registry.connect(&initech, ProtocolVersion::V6, daemon("i"));
        assert_eq!(registry.len(), 2);

        registry.disconnect(&initech, registration);
        assert_eq!(registry.len(), 2);
        registry.disconnect(&acme, registration);
        assert_eq!(registry.version(&acme), None);
        assert_eq!(registry.version(&initech), Some(ProtocolVersion::V6));
    }
}
