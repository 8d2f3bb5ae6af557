use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use umbra_core::{IntentObject, ServiceConnection, WatchEvent};

use crate::cache::IntentCache;
use crate::error::{ControllerError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Initial listing of the intent objects a source knows about.
#[derive(Debug, Clone, Default)]
pub struct IntentSnapshot {
    pub services: Vec<Service>,
    pub connections: Vec<ServiceConnection>,
}

/// Where intent objects come from.
///
/// A source hands back everything it currently knows plus a stream of
/// changes from that point on. The hub owns reconnect-free consumption;
/// a source that loses its stream simply ends it and the hub reports
/// [`ControllerError::WatchClosed`].
#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn subscribe(&self) -> Result<(IntentSnapshot, mpsc::Receiver<WatchEvent>)>;
}

/// Fans intent events out to controllers and keeps the [`IntentCache`]
/// current.
///
/// Events are applied to the cache before they are broadcast, so by the
/// time a subscriber sees an event the cache already reflects it. The hub
/// also rebroadcasts every cached object on a fixed period, which gives
/// reconcilers a chance to repair drift that produced no cluster event.
pub struct WatchHub {
    cache: Arc<IntentCache>,
    events: broadcast::Sender<WatchEvent>,
    sync_period: Duration,
}

impl WatchHub {
    pub fn new(cache: Arc<IntentCache>, sync_period: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cache,
            events,
            sync_period,
        }
    }

    /// Register a subscriber. Subscribers only see events sent after this
    /// call, so controllers subscribe before the hub starts running.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> Arc<IntentCache> {
        Arc::clone(&self.cache)
    }

    /// Pump the source into the cache and the broadcast channel until
    /// cancelled. Marks the cache synced once the initial snapshot has
    /// been folded in.
    pub async fn run(&self, source: Arc<dyn IntentSource>, token: CancellationToken) -> Result<()> {
        let (snapshot, mut events) = source.subscribe().await?;
        info!(
            "Watching intent: {} services, {} connections in the initial snapshot",
            snapshot.services.len(),
            snapshot.connections.len()
        );

        for service in snapshot.services {
            self.dispatch(WatchEvent::added(IntentObject::Service(service)))
                .await;
        }
        for connection in snapshot.connections {
            self.dispatch(WatchEvent::added(IntentObject::Connection(connection)))
                .await;
        }
        self.cache.mark_synced();

        let mut resync = tokio::time::interval(self.sync_period);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Watch hub stopping");
                    return Ok(());
                }
                _ = resync.tick() => self.resync().await,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => return Err(ControllerError::WatchClosed),
                },
            }
        }
    }

    async fn dispatch(&self, mut event: WatchEvent) {
        match self.cache.apply(&event).await {
            Ok(previous) => {
                event.previous = previous;
                // Send only fails when nobody is subscribed, which is fine.
                let _ = self.events.send(event);
            }
            Err(err) => warn!("Dropping unkeyable watch event: {err}"),
        }
    }

    async fn resync(&self) {
        let services = self.cache.services().await;
        let connections = self.cache.connections().await;
        debug!(
            "Resync pass over {} services and {} connections",
            services.len(),
            connections.len()
        );
        for service in services {
            self.dispatch(WatchEvent::updated(IntentObject::Service(service)))
                .await;
        }
        for connection in connections {
            self.dispatch(WatchEvent::updated(IntentObject::Connection(connection)))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tokio::sync::Mutex;
    use umbra_core::{EventKind, ObjectKey};

    struct StaticSource {
        snapshot: IntentSnapshot,
        events: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    }

    impl StaticSource {
        fn new(snapshot: IntentSnapshot) -> (Arc<Self>, mpsc::Sender<WatchEvent>) {
            let (tx, rx) = mpsc::channel(16);
            let source = Arc::new(Self {
                snapshot,
                events: Mutex::new(Some(rx)),
            });
            (source, tx)
        }
    }

    #[async_trait]
    impl IntentSource for StaticSource {
        async fn subscribe(&self) -> Result<(IntentSnapshot, mpsc::Receiver<WatchEvent>)> {
            let events = self.events.lock().await.take().expect("subscribed twice");
            Ok((self.snapshot.clone(), events))
        }
    }

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

    fn hub() -> WatchHub {
        WatchHub::new(Arc::new(IntentCache::new()), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn snapshot_is_seeded_before_the_cache_reports_synced() {
        let hub = hub();
        let mut events = hub.subscribe();
        let cache = hub.cache();

        let snapshot = IntentSnapshot {
            services: vec![service("web")],
            ..Default::default()
        };
        let (source, _tx) = StaticSource::new(snapshot);

        let token = CancellationToken::new();
        let runner = {
            let token = token.clone();
            tokio::spawn(async move { hub.run(source, token).await })
        };

        cache.wait_for_sync().await;
        let key = ObjectKey::new("default".to_string(), "web".to_string());
        assert!(cache.service(&key).await.is_some());

        let seeded = events.recv().await.unwrap();
        assert_eq!(seeded.kind, EventKind::Added);
        assert_eq!(seeded.key().unwrap(), key);

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cache_is_updated_before_subscribers_are_notified() {
        let hub = hub();
        let mut events = hub.subscribe();
        let cache = hub.cache();
        let (source, tx) = StaticSource::new(IntentSnapshot::default());

        let token = CancellationToken::new();
        let runner = {
            let token = token.clone();
            tokio::spawn(async move { hub.run(source, token).await })
        };
        cache.wait_for_sync().await;

        tx.send(WatchEvent::added(IntentObject::Service(service("web"))))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        let key = event.key().unwrap();
        assert!(
            cache.service(&key).await.is_some(),
            "the cache must already hold the object when the event lands"
        );

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn delete_events_carry_the_cached_previous_value() {
        let hub = hub();
        let mut events = hub.subscribe();
        let cache = hub.cache();

        let mut stamped = service("web");
        stamped.metadata.resource_version = Some("42".to_string());
        let snapshot = IntentSnapshot {
            services: vec![stamped],
            ..Default::default()
        };
        let (source, tx) = StaticSource::new(snapshot);

        let token = CancellationToken::new();
        let runner = {
            let token = token.clone();
            tokio::spawn(async move { hub.run(source, token).await })
        };
        cache.wait_for_sync().await;
        let _seeded = events.recv().await.unwrap();

        // A deletion notice often carries a bare object; the hub restores
        // the last cached copy as `previous`.
        tx.send(WatchEvent::deleted(IntentObject::Service(service("web"))))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Deleted);
        match event.previous {
            Some(IntentObject::Service(ref old)) => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("42"))
            }
            other => panic!("expected the cached service, got {other:?}"),
        }
        assert!(cache.service(&event.key().unwrap()).await.is_none());

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resync_rebroadcasts_cached_objects() {
        let hub = WatchHub::new(Arc::new(IntentCache::new()), Duration::from_secs(30));
        let mut events = hub.subscribe();
        let cache = hub.cache();

        let snapshot = IntentSnapshot {
            services: vec![service("web")],
            ..Default::default()
        };
        let (source, _tx) = StaticSource::new(snapshot);

        let token = CancellationToken::new();
        let runner = {
            let token = token.clone();
            tokio::spawn(async move { hub.run(source, token).await })
        };
        cache.wait_for_sync().await;
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Added);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Updated);
        assert_eq!(
            event.key().unwrap(),
            ObjectKey::new("default".to_string(), "web".to_string())
        );

        token.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_source_stream_is_an_error() {
        let hub = hub();
        let (source, tx) = StaticSource::new(IntentSnapshot::default());

        let token = CancellationToken::new();
        let runner = tokio::spawn(async move { hub.run(source, token).await });

        drop(tx);
        match runner.await.unwrap() {
            Err(ControllerError::WatchClosed) => {}
            other => panic!("expected WatchClosed, got {other:?}"),
        }
    }
}
