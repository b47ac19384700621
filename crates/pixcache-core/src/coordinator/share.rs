//! One producer, its replay buffer and the consumers reading it.

use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::{Mutex, MutexGuard};

pub(crate) type Producer<V> = BoxStream<'static, Result<V>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Status {
    Running,
    Stopped,
    Failed(String),
    /// Every consumer left before the producer finished.
    Abandoned,
}

pub(crate) struct ShareState<V> {
    pub buffer: Vec<V>,
    pub status: Status,
    pub consumers: usize,
    pub expires_at: Option<DateTime<Utc>>,
    /// Invalidated while running: never promoted to the replay cache.
    pub detached: bool,
}

/// What a consumer at `index` can do next.
pub(crate) enum Slot<V> {
    Ready(V),
    /// Caught up with a running producer.
    Frontier,
    Finished,
    Failed(String),
}

/// Result of trying to read a running share.
pub(crate) enum Join {
    Joined,
    /// Still running but invalidated: read only after it finishes.
    Detached,
    Closed,
}

pub(crate) struct Share<K, V> {
    pub id: u64,
    pub key: K,
    /// Started by a force-fresh read, so it never serves stale local data.
    pub fresh: bool,
    state: Mutex<ShareState<V>>,
    /// Held by whichever consumer is pulling the next item.
    pub producer: tokio::sync::Mutex<Option<Producer<V>>>,
}

impl<K, V: Clone> Share<K, V> {
    /// A running share with one attached consumer.
    pub fn new(id: u64, key: K, fresh: bool, producer: Producer<V>) -> Self {
        Self {
            id,
            key,
            fresh,
            state: Mutex::new(ShareState {
                buffer: Vec::new(),
                status: Status::Running,
                consumers: 1,
                expires_at: None,
                detached: false,
            }),
            producer: tokio::sync::Mutex::new(Some(producer)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ShareState<V>> {
        // The state is plain data; a panic elsewhere cannot leave it torn.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn slot(&self, index: usize) -> Slot<V> {
        let state = self.state();
        if let Some(item) = state.buffer.get(index) {
            return Slot::Ready(item.clone());
        }
        match &state.status {
            Status::Running => Slot::Frontier,
            Status::Stopped => Slot::Finished,
            Status::Failed(message) => Slot::Failed(message.clone()),
            Status::Abandoned => Slot::Failed("fetch was cancelled".to_string()),
        }
    }

    pub fn push(&self, item: V) {
        self.state().buffer.push(item);
    }

    /// Join a running share that has not been invalidated.
    pub fn try_join_running(&self) -> Join {
        let mut state = self.state();
        if state.status != Status::Running {
            Join::Closed
        } else if state.detached {
            Join::Detached
        } else {
            state.consumers += 1;
            Join::Joined
        }
    }

    /// Mark a running share as never replayable. Returns false once it has
    /// finished.
    pub fn detach_if_running(&self) -> bool {
        let mut state = self.state();
        state.detached = true;
        state.status == Status::Running
    }

    /// Join a stopped share whose deadline has not passed.
    pub fn try_join_replay(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state();
        let live = state.status == Status::Stopped
            && !state.detached
            && state.expires_at.is_some_and(|deadline| deadline > now);
        if live {
            state.consumers += 1;
        }
        live
    }
}
