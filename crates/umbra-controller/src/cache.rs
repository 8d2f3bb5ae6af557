use std::collections::HashMap;

use k8s_openapi::api::core::v1::Service;
use tokio::sync::{watch, RwLock};
use umbra_core::{EventKind, IntentObject, ObjectKey, ServiceConnection, WatchEvent};

#[derive(Default)]
struct CacheState {
    services: HashMap<ObjectKey, Service>,
    connections: HashMap<ObjectKey, ServiceConnection>,
}

/// In-memory view of the cluster's intent objects.
///
/// The cache is written only by the watch hub; reconcilers read from it so
/// a sync never has to ask the cluster what an object currently looks like.
pub struct IntentCache {
    state: RwLock<CacheState>,
    synced_tx: watch::Sender<bool>,
}

impl IntentCache {
    pub fn new() -> Self {
        let (synced_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(CacheState::default()),
            synced_tx,
        }
    }

    pub async fn service(&self, key: &ObjectKey) -> Option<Service> {
        self.state.read().await.services.get(key).cloned()
    }

    pub async fn connection(&self, key: &ObjectKey) -> Option<ServiceConnection> {
        self.state.read().await.connections.get(key).cloned()
    }

    pub async fn services(&self) -> Vec<Service> {
        self.state.read().await.services.values().cloned().collect()
    }

    pub async fn connections(&self) -> Vec<ServiceConnection> {
        self.state
            .read()
            .await
            .connections
            .values()
            .cloned()
            .collect()
    }

    /// Fold an event into the cache, returning the state the object had
    /// before the event so it can travel along as `WatchEvent::previous`.
    pub(crate) async fn apply(&self, event: &WatchEvent) -> umbra_core::Result<Option<IntentObject>> {
        let key = event.key()?;
        let mut state = self.state.write().await;
        let previous = match (&event.kind, &event.object) {
            (EventKind::Deleted, IntentObject::Service(_)) => {
                state.services.remove(&key).map(IntentObject::Service)
            }
            (EventKind::Deleted, IntentObject::Connection(_)) => {
                state.connections.remove(&key).map(IntentObject::Connection)
            }
            (_, IntentObject::Service(service)) => state
                .services
                .insert(key, service.clone())
                .map(IntentObject::Service),
            (_, IntentObject::Connection(connection)) => state
                .connections
                .insert(key, connection.clone())
                .map(IntentObject::Connection),
        };
        Ok(previous)
    }

    /// Flag the cache as holding a complete initial snapshot.
    pub(crate) fn mark_synced(&self) {
        let _ = self.synced_tx.send(true);
    }

    pub fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Wait until the initial snapshot has been loaded.
    pub async fn wait_for_sync(&self) {
        let mut rx = self.synced_tx.subscribe();
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl Default for IntentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn connection(name: &str) -> ServiceConnection {
        let mut connection = ServiceConnection::default();
        connection.metadata.name = Some(name.to_string());
        connection.metadata.namespace = Some("default".to_string());
        connection
    }

    #[tokio::test]
    async fn apply_tracks_adds_updates_and_deletes() {
        let cache = IntentCache::new();
        let key = ObjectKey::new("default".to_string(), "web".to_string());

        let previous = cache
            .apply(&WatchEvent::added(IntentObject::Service(service("web"))))
            .await
            .unwrap();
        assert!(previous.is_none());
        assert!(cache.service(&key).await.is_some());

        let mut changed = service("web");
        changed.metadata.resource_version = Some("2".to_string());
        let previous = cache
            .apply(&WatchEvent::updated(IntentObject::Service(changed)))
            .await
            .unwrap();
        match previous {
            Some(IntentObject::Service(old)) => assert_eq!(old.metadata.resource_version, None),
            other => panic!("expected the stored service, got {other:?}"),
        }

        let previous = cache
            .apply(&WatchEvent::deleted(IntentObject::Service(service("web"))))
            .await
            .unwrap();
        assert!(previous.is_some());
        assert!(cache.service(&key).await.is_none());
    }

    #[tokio::test]
    async fn connections_are_tracked_separately_from_services() {
        let cache = IntentCache::new();
        cache
            .apply(&WatchEvent::added(IntentObject::Service(service("web"))))
            .await
            .unwrap();
        cache
            .apply(&WatchEvent::added(IntentObject::Connection(connection(
                "web",
            ))))
            .await
            .unwrap();

        assert_eq!(cache.services().await.len(), 1);
        assert_eq!(cache.connections().await.len(), 1);

        cache
            .apply(&WatchEvent::deleted(IntentObject::Connection(connection(
                "web",
            ))))
            .await
            .unwrap();
        assert!(cache.connections().await.is_empty());
        assert_eq!(cache.services().await.len(), 1, "service copy untouched");
    }

    #[tokio::test]
    async fn sync_flag_releases_waiters() {
        let cache = std::sync::Arc::new(IntentCache::new());
        assert!(!cache.has_synced());

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_for_sync().await })
        };
        tokio::task::yield_now().await;

        cache.mark_synced();
        waiter.await.unwrap();
        assert!(cache.has_synced());

        // Waiting after the flag is set returns immediately.
        cache.wait_for_sync().await;
    }
}
