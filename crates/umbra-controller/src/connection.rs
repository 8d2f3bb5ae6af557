use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use umbra_cloud::CloudContext;
use umbra_core::{
    reasons, EventLevel, EventReporter, IntentObject, ObjectKey, ObjectRef, ServiceConnection,
    WatchEvent,
};

use crate::cache::IntentCache;
use crate::cluster::ClusterClient;
use crate::error::Result;
use crate::guard::{clear_connection_guard, ensure_connection_guard};
use crate::runtime::Reconcile;

/// Turns connection requests into approved private endpoints.
///
/// A connection names an exposed service in its own namespace. While both
/// sides exist the reconciler keeps a private endpoint in the consumer's
/// subnet wired to the service's private link service; once either side
/// starts deleting, the endpoint is removed and the deletion guard
/// released.
pub struct ConnectionReconciler {
    cloud: Arc<CloudContext>,
    cluster: Arc<dyn ClusterClient>,
    cache: Arc<IntentCache>,
    reporter: Arc<dyn EventReporter>,
}

impl ConnectionReconciler {
    pub fn new(
        cloud: Arc<CloudContext>,
        cluster: Arc<dyn ClusterClient>,
        cache: Arc<IntentCache>,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            cloud,
            cluster,
            cache,
            reporter,
        }
    }

    async fn cleanup(&self, connection: &ServiceConnection) -> Result<()> {
        self.cloud.remove_endpoint(connection).await?;
        clear_connection_guard(self.cluster.as_ref(), connection).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for ConnectionReconciler {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn wants(&self, event: &WatchEvent) -> bool {
        matches!(event.object, IntentObject::Connection(_))
    }

    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let Some(connection) = self.cache.connection(key).await else {
            debug!("Connection '{key}' is gone from the cluster, nothing to do");
            return Ok(());
        };

        let service_key = ObjectKey::new(
            key.namespace.clone(),
            connection.spec.service_name.clone(),
        );
        let Some(service) = self.cache.service(&service_key).await else {
            // A dangling connection is the owner's mistake, not a retryable
            // controller failure. Flag it and clear out whatever we own.
            let message = format!(
                "Tried to sync connection: {} but service: {} does not exist in namespace: {}",
                key.name, connection.spec.service_name, key.namespace
            );
            self.reporter
                .record(
                    &ObjectRef::connection(&key.namespace, &key.name),
                    EventLevel::Warning,
                    reasons::NO_SERVICE_FOR_CONNECTION,
                    &message,
                )
                .await;
            return self.cleanup(&connection).await;
        };

        if connection.is_deleting() || service.metadata.deletion_timestamp.is_some() {
            return self.cleanup(&connection).await;
        }

        ensure_connection_guard(self.cluster.as_ref(), &connection).await?;
        self.cloud.add_update_private_connection(&connection).await?;
        Ok(())
    }
}
