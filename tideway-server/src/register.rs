//! Attaching a freshly connected daemon to the registry for as long as its
//! connection lasts.

use std::sync::Arc;

use tracing::info;

use crate::registry::{DaemonRegistry, TenantId};
use crate::remote::{
    Codec, FrameChannel, Platform, PlatformCloser, ProtocolVersion, RpcClient, V4Codec, V5Codec,
    V6Codec,
};

/// Serve `tenant`'s daemon over `channel` until it disconnects.
///
/// The daemon is reachable through `registry` for the whole time this
/// future runs, unless a newer connection for the same tenant replaces it.
pub async fn register<T: FrameChannel>(
    registry: Arc<dyn DaemonRegistry>,
    tenant: TenantId,
    version: ProtocolVersion,
    channel: T,
) {
    match version {
        ProtocolVersion::V4 => attach(registry, tenant, V4Codec, channel).await,
        ProtocolVersion::V5 => attach(registry, tenant, V5Codec, channel).await,
        ProtocolVersion::V6 => attach(registry, tenant, V6Codec, channel).await,
    }
}

async fn attach<C: Codec, T: FrameChannel>(
    registry: Arc<dyn DaemonRegistry>,
    tenant: TenantId,
    codec: C,
    channel: T,
) {
    let (client, connection) = RpcClient::new(codec, channel);
    let client = Arc::new(client);

    let registration = registry.connect(
        &tenant,
        C::VERSION,
        Arc::clone(&client) as Arc<dyn Platform>,
    );
    info!(%tenant, version = %C::VERSION, "daemon connected");

    connection.run().await;

    registry.disconnect(&tenant, registration);
    client.close();
    info!(%tenant, version = %C::VERSION, "daemon disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::remote::{serve, RemoteError};
    use crate::testing::{channel_pair, FakeDaemon};
    use std::time::Duration;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_daemon_is_reachable_while_connected() {
        for version in [ProtocolVersion::V4, ProtocolVersion::V5, ProtocolVersion::V6] {
            let registry = Arc::new(InMemoryRegistry::new());
            let tenant = TenantId::from("acme");
            let (server_end, daemon_end) = channel_pair();

            let session = tokio::spawn(register(
                registry.clone() as Arc<dyn DaemonRegistry>,
                tenant.clone(),
                version,
                server_end,
            ));
            let daemon = tokio::spawn(async move {
                let fake = FakeDaemon::default();
                match version {
                    ProtocolVersion::V4 => serve(V4Codec, daemon_end, &fake).await,
                    ProtocolVersion::V5 => serve(V5Codec, daemon_end, &fake).await,
                    ProtocolVersion::V6 => serve(V6Codec, daemon_end, &fake).await,
                }
            });

            wait_for(|| registry.version(&tenant).is_some()).await;
            assert_eq!(registry.version(&tenant), Some(version));

            let platform = registry.get(&tenant).unwrap();
            assert_eq!(platform.version().await.unwrap(), FakeDaemon::VERSION);

            // Hanging up the daemon ends the session and unregisters it.
            daemon.abort();
            session.await.unwrap();
            assert!(registry.get(&tenant).is_none());
            assert_eq!(platform.ping().await.unwrap_err(), RemoteError::Disconnected);
        }
    }

    #[tokio::test]
    async fn test_stale_session_leaves_replacement() {
        let registry = Arc::new(InMemoryRegistry::new());
        let tenant = TenantId::from("acme");

        let (old_server, old_daemon) = channel_pair();
        let old = tokio::spawn(register(
            registry.clone() as Arc<dyn DaemonRegistry>,
            tenant.clone(),
            ProtocolVersion::V5,
            old_server,
        ));
        wait_for(|| registry.version(&tenant) == Some(ProtocolVersion::V5)).await;

        let (new_server, new_daemon) = channel_pair();
        let _new = tokio::spawn(register(
            registry.clone() as Arc<dyn DaemonRegistry>,
            tenant.clone(),
            ProtocolVersion::V6,
            new_server,
        ));
        wait_for(|| registry.version(&tenant) == Some(ProtocolVersion::V6)).await;

        drop(old_daemon);
        old.await.unwrap();
        assert_eq!(registry.version(&tenant), Some(ProtocolVersion::V6));
        drop(new_daemon);
    }
}
