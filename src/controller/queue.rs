//! Rate-limited, deduplicating work queue
//!
//! Semantics follow the classic controller work queue:
//! - a key is pending at most once, however often it is added
//! - a key handed out by [`WorkQueue::next`] is "in flight" until
//!   [`WorkQueue::done`]; adding it meanwhile marks it dirty and it is
//!   re-queued when the lease is released, so one key is never processed by
//!   two workers at once and no change is lost
//! - failed keys come back through [`WorkQueue::add_rate_limited`] after a
//!   per-key exponential backoff capped at [`QueueConfig::max_delay`]

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use crate::config::QueueConfig;

/// Exponential backoff: `base * 2^failures`, capped at `max`
pub fn backoff_delay(config: &QueueConfig, failures: u32) -> Duration {
    let factor = 2_u32.saturating_pow(failures.min(31));
    config.base_delay.saturating_mul(factor).min(config.max_delay)
}

struct State<T> {
    queue: VecDeque<T>,
    /// Keys that need processing; superset of `queue`
    dirty: HashSet<T>,
    /// Keys currently leased by a worker
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

struct Inner<T> {
    name: String,
    config: QueueConfig,
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply cloneable handle to a named work queue
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `item` as needing processing. Adding a pending key is a no-op.
    pub fn add(&self, item: T) {
        {
            let mut state = self.inner.lock();
            if state.shutting_down || !state.dirty.insert(item.clone()) {
                return;
            }
            if state.processing.contains(&item) {
                // picked up again by `done`
                return;
            }
            trace!(queue = %self.inner.name, ?item, "enqueued");
            state.queue.push_back(item);
        }
        self.inner.notify.notify_waiters();
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Re-add `item` after its backoff delay and count the failure
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.inner.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let delay = backoff_delay(&self.inner.config, *failures);
            *failures = failures.saturating_add(1);
            delay
        };
        trace!(queue = %self.inner.name, ?item, ?delay, "requeue with backoff");
        self.add_after(item, delay);
    }

    /// Reset the backoff of `item` after a successful pass
    pub fn forget(&self, item: &T) {
        self.inner.lock().failures.remove(item);
    }

    /// Number of consecutive failures recorded for `item`
    pub fn retries(&self, item: &T) -> u32 {
        self.inner.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next pending key and lease it.
    ///
    /// Returns `None` once the queue is shutting down.
    pub async fn next(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Release the lease on `item`
    pub fn done(&self, item: &T) {
        {
            let mut state = self.inner.lock();
            state.processing.remove(item);
            if !state.shutting_down && state.dirty.contains(item) {
                state.queue.push_back(item.clone());
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Number of pending (not in-flight) keys
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Stop handing out keys; pending and future adds are dropped
    pub fn shut_down(&self) {
        self.inner.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// [`shut_down`](Self::shut_down), then wait until every lease is released
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().processing.is_empty() {
                return;
            }

            notified.await;
        }
    }
}
