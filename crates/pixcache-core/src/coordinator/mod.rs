//! Fetch sharing across concurrent callers.
//!
//! [`FetchCoordinator`] keys lazy producers by resource. The first `get` for
//! a key starts a producer; later callers attach to it and replay what it
//! has produced so far before reading live. A producer that finishes is
//! kept in a bounded replay cache until its deadline, so repeat requests
//! are served without re-running it. A producer whose consumers all leave
//! early is dropped, and a failed producer is forgotten immediately.
//!
//! There is at most one running producer per key. Invalidating a key while
//! its producer runs lets current consumers finish but bars new ones: a
//! later `get` first drives the old producer to its end, discarding the
//! items, and only then starts (or joins) a new one.
//!
//! Lock order is registry, then share state. The async pull lock is only
//! taken with neither held.

mod share;

use crate::config::CoordinatorDefaults;
use crate::error::{PixError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use mini_moka::sync::Cache;
use share::{Join, Share, Slot, Status};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Starts a producer for a key.
pub type FetchFn<K, V> = Arc<dyn Fn(&K) -> BoxStream<'static, Result<V>> + Send + Sync>;

/// Derives a replay deadline from a produced item.
pub type ExpiryHook<K, V> = Arc<dyn Fn(&K, &V) -> Option<DateTime<Utc>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Replay lifetime for producers that never set a deadline.
    pub default_replay_ttl: Duration,
    /// Hard cap on any replay lifetime.
    pub max_replay_ttl: Duration,
    /// Maximum number of finished results kept for replay.
    pub replay_capacity: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_replay_ttl: CoordinatorDefaults::REPLAY_TTL,
            max_replay_ttl: CoordinatorDefaults::MAX_REPLAY_TTL,
            replay_capacity: CoordinatorDefaults::REPLAY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    /// Producers currently running.
    pub live_shares: usize,
    /// Finished results held for replay (approximate).
    pub replay_entries: u64,
}

struct Inner<K, V> {
    fetch: FetchFn<K, V>,
    expiry_hook: Option<ExpiryHook<K, V>>,
    config: CoordinatorConfig,
    live: Mutex<HashMap<K, Arc<Share<K, V>>>>,
    replay: Cache<K, Arc<Share<K, V>>>,
    next_id: AtomicU64,
}

/// Coalesces concurrent fetches of the same key onto one producer.
pub struct FetchCoordinator<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for FetchCoordinator<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> FetchCoordinator<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(fetch: FetchFn<K, V>, config: CoordinatorConfig) -> Self {
        Self::build(fetch, None, config)
    }

    /// Like [`FetchCoordinator::new`], with a hook that may set a share's
    /// replay deadline from its items. The hook runs on each produced item
    /// until a deadline is set.
    pub fn with_expiry_hook(
        fetch: FetchFn<K, V>,
        hook: ExpiryHook<K, V>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::build(fetch, Some(hook), config)
    }

    fn build(
        fetch: FetchFn<K, V>,
        expiry_hook: Option<ExpiryHook<K, V>>,
        config: CoordinatorConfig,
    ) -> Self {
        let replay = Cache::builder()
            .time_to_live(config.max_replay_ttl)
            .max_capacity(config.replay_capacity)
            .build();
        Self {
            inner: Arc::new(Inner {
                fetch,
                expiry_hook,
                config,
                live: Mutex::new(HashMap::new()),
                replay,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Read the result for `key`, sharing any producer already running.
    ///
    /// With `force_fresh`, a cached or running result for the key is not
    /// reused; the read waits for a new producer. Concurrent force-fresh
    /// reads share that new producer.
    pub fn get(&self, key: K, force_fresh: bool) -> BoxStream<'static, Result<V>> {
        let (share, draining) = self.inner.attach(&key, force_fresh).into_parts();
        let consumer = Consumer {
            inner: self.inner.clone(),
            share,
            index: 0,
            done: false,
            draining,
            fresh: force_fresh,
        };
        stream::unfold(consumer, |mut consumer| async move {
            consumer.next().await.map(|item| (item, consumer))
        })
        .boxed()
    }

    /// Forget `key`. A running producer keeps serving its current consumers
    /// but is never replayed, and new readers wait for it to end.
    pub fn invalidate(&self, key: &K) {
        let mut live = self.inner.live();
        if let Some(share) = live.get(key) {
            if share.detach_if_running() {
                info!("coordinator: detached running fetch for {}", key);
            } else {
                live.remove(key);
            }
        }
        self.inner.replay.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        let mut live = self.inner.live();
        live.retain(|_, share| share.detach_if_running());
        let running = live.len();
        self.inner.replay.invalidate_all();
        info!("coordinator: invalidated everything ({} still running)", running);
    }

    /// Set the replay deadline of a running producer.
    ///
    /// Returns false when nothing is running for `key`.
    pub fn set_expiry(&self, key: &K, deadline: DateTime<Utc>) -> bool {
        let live = self.inner.live();
        match live.get(key) {
            Some(share) => {
                let mut state = share.state();
                if state.status == Status::Running {
                    state.expires_at = Some(deadline);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Whether a finished result for `key` would be replayed right now.
    pub fn is_replayable(&self, key: &K) -> bool {
        self.inner.replay.get(key).is_some_and(|share| {
            let state = share.state();
            state.status == Status::Stopped
                && state.expires_at.is_some_and(|deadline| deadline > Utc::now())
        })
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            live_shares: self.inner.live().len(),
            replay_entries: self.inner.replay.entry_count(),
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn live(&self) -> MutexGuard<'_, HashMap<K, Arc<Share<K, V>>>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Find or start the share a new consumer should read.
    ///
    /// A `fresh` consumer skips the replay cache and supersedes a running
    /// producer unless that one was also started fresh.
    fn attach(&self, key: &K, fresh: bool) -> Attachment<K, V> {
        let mut live = self.live();

        if let Some(share) = live.get(key) {
            if fresh && !share.fresh && share.detach_if_running() {
                debug!("coordinator: superseding running fetch for {}", key);
            }
            match share.try_join_running() {
                Join::Joined => {
                    debug!("coordinator: joined running fetch for {}", key);
                    return Attachment::Reading(share.clone());
                }
                Join::Detached => {
                    debug!("coordinator: waiting out invalidated fetch for {}", key);
                    return Attachment::Behind(share.clone());
                }
                Join::Closed => {
                    live.remove(key);
                }
            }
        }

        if fresh {
            self.replay.invalidate(key);
        } else if let Some(share) = self.replay.get(key) {
            if share.try_join_replay(Utc::now()) {
                debug!("coordinator: replaying finished fetch for {}", key);
                return Attachment::Reading(share);
            }
            debug!("coordinator: replay for {} expired", key);
            self.replay.invalidate(key);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let share = Arc::new(Share::new(id, key.clone(), fresh, (self.fetch)(key)));
        live.insert(key.clone(), share.clone());
        debug!("coordinator: started fetch #{} for {}", id, key);
        Attachment::Reading(share)
    }

    fn remove_live(live: &mut HashMap<K, Arc<Share<K, V>>>, share: &Share<K, V>) {
        if live.get(&share.key).is_some_and(|current| current.id == share.id) {
            live.remove(&share.key);
        }
    }

    fn observe(&self, share: &Share<K, V>, item: &V) {
        let Some(hook) = &self.expiry_hook else {
            return;
        };
        let mut state = share.state();
        if state.expires_at.is_none() {
            state.expires_at = hook(&share.key, item);
        }
    }

    /// Producer finished: move the share to the replay cache.
    fn complete(&self, share: &Arc<Share<K, V>>) {
        let mut live = self.live();
        let mut state = share.state();
        state.status = Status::Stopped;
        Self::remove_live(&mut live, share);

        if state.detached {
            debug!("coordinator: fetch for {} finished after invalidation", share.key);
            return;
        }

        let now = Utc::now();
        let cap = deadline_after(now, self.config.max_replay_ttl);
        let deadline = state
            .expires_at
            .unwrap_or_else(|| deadline_after(now, self.config.default_replay_ttl))
            .min(cap);
        state.expires_at = Some(deadline);
        let produced = state.buffer.len();
        drop(state);

        if deadline > now {
            self.replay.insert(share.key.clone(), share.clone());
            info!(
                "coordinator: fetch for {} finished with {} items, replayable until {}",
                share.key, produced, deadline
            );
        } else {
            info!(
                "coordinator: fetch for {} finished with {} items, already expired",
                share.key, produced
            );
        }
    }

    /// Producer failed: forget the share so the next `get` starts over.
    fn fail(&self, share: &Share<K, V>, error: &PixError) {
        let mut live = self.live();
        share.state().status = Status::Failed(error.to_string());
        Self::remove_live(&mut live, share);
        warn!("coordinator: fetch for {} failed: {}", share.key, error);
    }

    /// A consumer went away.
    fn detach(&self, share: &Share<K, V>) {
        let mut live = self.live();
        let mut state = share.state();
        state.consumers = state.consumers.saturating_sub(1);
        if state.consumers > 0 || state.status != Status::Running {
            return;
        }

        state.status = Status::Abandoned;
        drop(state);
        Self::remove_live(&mut live, share);
        drop(live);

        // Drop the producer now if nobody is mid-pull; otherwise it goes
        // with the last reference to the share.
        if let Ok(mut producer) = share.producer.try_lock() {
            producer.take();
        }
        debug!("coordinator: abandoned unfinished fetch for {}", share.key);
    }
}

fn deadline_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

enum Attachment<K, V> {
    /// Counted as a consumer of the share.
    Reading(Arc<Share<K, V>>),
    /// Must let this invalidated share finish before attaching again.
    Behind(Arc<Share<K, V>>),
}

impl<K, V> Attachment<K, V> {
    /// The share, and whether it must be drained first.
    fn into_parts(self) -> (Arc<Share<K, V>>, bool) {
        match self {
            Attachment::Reading(share) => (share, false),
            Attachment::Behind(share) => (share, true),
        }
    }
}

/// A caller's read position in a share.
struct Consumer<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
    share: Arc<Share<K, V>>,
    index: usize,
    done: bool,
    /// Driving an invalidated share to its end; its items are not ours.
    draining: bool,
    fresh: bool,
}

impl<K, V> Consumer<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Leave a drained share and attach to whatever runs for the key now.
    fn reattach(&mut self) {
        let key = self.share.key.clone();
        let (share, draining) = self.inner.attach(&key, self.fresh).into_parts();
        self.share = share;
        self.index = 0;
        self.draining = draining;
    }

    async fn next(&mut self) -> Option<Result<V>> {
        if self.done {
            return None;
        }
        loop {
            match self.share.slot(self.index) {
                Slot::Ready(item) => {
                    self.index += 1;
                    if self.draining {
                        continue;
                    }
                    return Some(Ok(item));
                }
                Slot::Finished | Slot::Failed(_) if self.draining => {
                    self.reattach();
                    continue;
                }
                Slot::Finished => {
                    self.done = true;
                    return None;
                }
                Slot::Failed(message) => {
                    self.done = true;
                    return Some(Err(PixError::SharedFetchFailed {
                        key: self.share.key.to_string(),
                        message,
                    }));
                }
                Slot::Frontier => {}
            }

            let share = self.share.clone();
            let mut producer = share.producer.lock().await;
            // Someone else may have pulled while we waited for the lock.
            if !matches!(share.slot(self.index), Slot::Frontier) {
                continue;
            }
            let pulled = match producer.as_mut() {
                Some(stream) => Some(stream.next().await),
                None => None,
            };

            match pulled {
                Some(Some(Ok(item))) => {
                    self.inner.observe(&share, &item);
                    share.push(item);
                }
                Some(Some(Err(error))) => {
                    producer.take();
                    self.inner.fail(&share, &error);
                    drop(producer);
                    if self.draining {
                        self.reattach();
                        continue;
                    }
                    self.done = true;
                    return Some(Err(error));
                }
                Some(None) => {
                    producer.take();
                    self.inner.complete(&share);
                }
                None if self.draining => {
                    drop(producer);
                    self.reattach();
                }
                None => {
                    self.done = true;
                    return Some(Err(PixError::SharedFetchFailed {
                        key: share.key.to_string(),
                        message: "producer is gone".to_string(),
                    }));
                }
            }
        }
    }
}

impl<K, V> Drop for Consumer<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.draining {
            self.inner.detach(&self.share);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::atomic::AtomicUsize;

    fn counting(calls: Arc<AtomicUsize>, items: Vec<u32>) -> FetchFn<String, u32> {
        Arc::new(move |_key: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            stream::iter(items.clone().into_iter().map(Ok)).boxed()
        })
    }

    #[tokio::test]
    async fn test_replay_after_completion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = FetchCoordinator::new(
            counting(calls.clone(), vec![1, 2, 3]),
            CoordinatorConfig::default(),
        );

        let first: Vec<u32> = coordinator.get("k".into(), false).try_collect().await.unwrap();
        let second: Vec<u32> = coordinator.get("k".into(), false).try_collect().await.unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_replayable(&"k".to_string()));
        assert_eq!(coordinator.stats().live_shares, 0);
    }

    #[tokio::test]
    async fn test_force_fresh_restarts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = FetchCoordinator::new(
            counting(calls.clone(), vec![7]),
            CoordinatorConfig::default(),
        );

        let _: Vec<u32> = coordinator.get("k".into(), false).try_collect().await.unwrap();
        let _: Vec<u32> = coordinator.get("k".into(), true).try_collect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = FetchCoordinator::new(
            counting(calls.clone(), vec![1]),
            CoordinatorConfig::default(),
        );

        let _: Vec<u32> = coordinator.get("a".into(), false).try_collect().await.unwrap();
        let _: Vec<u32> = coordinator.get("b".into(), false).try_collect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expiry_hook_sets_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let past: ExpiryHook<String, u32> = Arc::new(|_key: &String, _item: &u32| {
            Some(Utc::now() - chrono::Duration::seconds(1))
        });
        let coordinator = FetchCoordinator::with_expiry_hook(
            counting(calls.clone(), vec![1, 2]),
            past,
            CoordinatorConfig::default(),
        );

        let _: Vec<u32> = coordinator.get("k".into(), false).try_collect().await.unwrap();
        assert!(!coordinator.is_replayable(&"k".to_string()));
        let _: Vec<u32> = coordinator.get("k".into(), false).try_collect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_expiry_requires_running_share() {
        let coordinator = FetchCoordinator::new(
            counting(Arc::new(AtomicUsize::new(0)), vec![1]),
            CoordinatorConfig::default(),
        );
        assert!(!coordinator.set_expiry(&"k".to_string(), Utc::now()));

        let mut stream = coordinator.get("k".into(), false);
        assert!(coordinator.set_expiry(&"k".to_string(), Utc::now()));
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    }
}
