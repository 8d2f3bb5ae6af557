use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use umbra_core::{ObjectKey, WatchEvent};

use crate::cache::IntentCache;
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::watch::WatchHub;

/// The sync half of a controller.
///
/// `wants` filters the event stream down to the objects this controller
/// cares about; `sync` drives one object to its desired state. Syncs must
/// be level-based: the key is the only input, the current state comes from
/// the cache, and running a sync twice must be harmless.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn wants(&self, event: &WatchEvent) -> bool;
    async fn sync(&self, key: &ObjectKey) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            min_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

/// Runs a [`Reconcile`] implementation against the intent event stream.
///
/// Events that pass the reconciler's filter are reduced to object keys and
/// pushed through a deduplicating work queue to a pool of sync workers.
/// Failed syncs are requeued with exponential backoff; successful ones
/// reset it.
pub struct Controller<R: Reconcile> {
    reconciler: Arc<R>,
    cache: Arc<IntentCache>,
    queue: Arc<WorkQueue>,
    events: broadcast::Receiver<WatchEvent>,
    config: ControllerConfig,
}

impl<R: Reconcile> Controller<R> {
    /// Wire a reconciler up to the hub. This subscribes immediately, so a
    /// controller built before the hub starts running sees every event
    /// including the initial snapshot.
    pub fn new(reconciler: R, hub: &WatchHub, config: ControllerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            cache: hub.cache(),
            queue: Arc::new(WorkQueue::new(
                config.min_retry_delay,
                config.max_retry_delay,
            )),
            events: hub.subscribe(),
            config,
        }
    }

    /// Process events until the token is cancelled. Waits for the cache to
    /// hold the initial snapshot before the first sync runs.
    pub async fn run(self, token: CancellationToken) {
        tokio::select! {
            _ = self.cache.wait_for_sync() => {}
            _ = token.cancelled() => return,
        }
        let workers = self.config.workers.max(1);
        info!(
            "Starting {} controller with {} workers",
            self.reconciler.name(),
            workers
        );

        let pump = {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let token = token.clone();
            let mut events = self.events;
            tokio::spawn(async move {
                let name = reconciler.name();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        event = events.recv() => match event {
                            Ok(event) => {
                                if !reconciler.wants(&event) {
                                    continue;
                                }
                                match event.key() {
                                    Ok(key) => queue.add(key).await,
                                    Err(err) => warn!("Dropping unkeyable event: {err}"),
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(
                                    "{name} controller fell {missed} events behind, \
                                     the periodic resync will catch the gap"
                                );
                            }
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                    }
                }
            })
        };

        let mut sync_workers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            sync_workers.push(tokio::spawn(async move {
                let name = reconciler.name();
                while let Some(key) = queue.get().await {
                    match reconciler.sync(&key).await {
                        Ok(()) => queue.forget(&key).await,
                        Err(err) => {
                            debug!("{name}: sync of '{key}' failed, requeueing: {err}");
                            queue.add_rate_limited(key.clone()).await;
                        }
                    }
                    queue.done(&key).await;
                }
            }));
        }

        token.cancelled().await;
        // Workers drain naturally: the queue stops handing out keys but
        // never interrupts a sync that already started.
        self.queue.shut_down().await;
        let _ = pump.await;
        for worker in sync_workers {
            let _ = worker.await;
        }
        info!("{} controller stopped", self.reconciler.name());
    }
}
