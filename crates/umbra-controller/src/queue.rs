use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use umbra_core::ObjectKey;

/// Per-key exponential backoff. The delay doubles on every consecutive
/// failure and is clamped to the configured maximum.
struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    failures: HashMap<ObjectKey, u32>,
}

impl RateLimiter {
    fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            failures: HashMap::new(),
        }
    }

    /// Returns the delay for the current failure count, then bumps the count.
    fn next_delay(&mut self, key: &ObjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self
            .min_delay
            .saturating_mul(2u32.saturating_pow(*failures))
            .min(self.max_delay);
        *failures += 1;
        delay
    }

    fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }
}

struct QueueState {
    queue: VecDeque<ObjectKey>,
    pending: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    limiter: RateLimiter,
    shutting_down: bool,
}

/// Deduplicating work queue with per-key retry backoff.
///
/// A key is queued at most once. Keys added while a worker is processing
/// them are parked in the dirty set and requeued when the worker calls
/// [`WorkQueue::done`], so bursts of events coalesce into a single sync.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(min_retry_delay: Duration, max_retry_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                pending: HashSet::new(),
                active: HashSet::new(),
                dirty: HashSet::new(),
                limiter: RateLimiter::new(min_retry_delay, max_retry_delay),
                shutting_down: false,
            }),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue a key for processing. Duplicates of a queued key are dropped,
    /// and a key currently being processed is parked until its worker
    /// finishes.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending.insert(key.clone()) {
            state.queue.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Queue a key after its backoff delay has elapsed.
    pub async fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let delay = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.limiter.next_delay(&key)
        };
        debug!("Requeueing '{}' in {:?}", key, delay);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(key).await,
                _ = queue.shutdown.cancelled() => {}
            }
        });
    }

    /// Reset the backoff state for a key after a successful sync.
    pub async fn forget(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.limiter.forget(key);
    }

    /// Take the next key, waiting until one is available. Returns `None`
    /// once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.pending.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    /// Mark a key as processed. If the key was re-added mid-sync it goes
    /// straight back onto the queue.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutting_down && state.pending.insert(key.clone()) {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    /// Stop handing out work. Queued keys are dropped and blocked `get`
    /// calls return `None`; syncs already in flight are left to finish.
    pub async fn shut_down(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.queue.clear();
            state.pending.clear();
        }
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default".to_string(), name.to_string())
    }

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
        ))
    }

    #[tokio::test]
    async fn add_deduplicates_queued_keys() {
        let queue = queue();
        queue.add(key("web")).await;
        queue.add(key("web")).await;
        queue.add(key("api")).await;
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.get().await, Some(key("web")));
        assert_eq!(queue.get().await, Some(key("api")));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn adds_during_processing_coalesce_into_one_requeue() {
        let queue = queue();
        queue.add(key("web")).await;

        let taken = queue.get().await.unwrap();
        queue.add(key("web")).await;
        queue.add(key("web")).await;
        assert!(queue.is_empty().await, "dirty keys stay off the queue");

        queue.done(&taken).await;
        assert_eq!(queue.len().await, 1);

        let again = queue.get().await.unwrap();
        queue.done(&again).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn rate_limiter_doubles_and_clamps() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5), Duration::from_secs(300));
        let web = key("web");

        assert_eq!(limiter.next_delay(&web), Duration::from_secs(5));
        assert_eq!(limiter.next_delay(&web), Duration::from_secs(10));
        assert_eq!(limiter.next_delay(&web), Duration::from_secs(20));
        for _ in 0..10 {
            limiter.next_delay(&web);
        }
        assert_eq!(limiter.next_delay(&web), Duration::from_secs(300));

        // Other keys back off independently.
        assert_eq!(limiter.next_delay(&key("api")), Duration::from_secs(5));

        limiter.forget(&web);
        assert_eq!(limiter.next_delay(&web), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_lands_after_the_delay() {
        let queue = queue();
        queue.add_rate_limited(key("web")).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some(key("web")));
    }

    #[tokio::test]
    async fn shutdown_releases_blocked_getters() {
        let queue = queue();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down().await;
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn adds_after_shutdown_are_dropped() {
        let queue = queue();
        queue.shut_down().await;

        queue.add(key("web")).await;
        queue.add_rate_limited(key("api")).await;
        assert!(queue.is_empty().await);
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_are_cancelled_by_shutdown() {
        let queue = queue();
        queue.add_rate_limited(key("web")).await;
        queue.shut_down().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty().await);
    }
}
