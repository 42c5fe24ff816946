use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Anything that accepts reconciliation keys
pub trait Enqueue: Send + Sync {
    fn enqueue(&self, key: &str);
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to apply after `failures` previous failures of the same key
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u128 << failures.min(64);
        let nanos = self
            .base
            .as_nanos()
            .saturating_mul(factor)
            .min(self.max.as_nanos());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed to a worker, in arrival order
    queue: VecDeque<String>,
    /// Keys waiting to be processed; a key is dirty until a worker picks it up
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    /// Consecutive failures per key, cleared by `forget`
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Deduplicating, rate-limited work queue of `namespace/name` keys
///
/// A key is handed to at most one worker at a time. Adding a key that is
/// already queued is a no-op; adding a key that a worker currently holds
/// marks it dirty so it is requeued once the worker calls [`WorkQueue::done`].
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a key for processing
    pub fn add(&self, key: &str) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!(queue = %self.inner.name, key, "Key in flight, deferring until done");
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = tokio::time::Instant::now() + delay;
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.add(&key);
        });
    }

    /// Queue a key after its backoff delay and count the failure
    pub fn add_rate_limited(&self, key: &str) {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        trace!(queue = %self.inner.name, key, ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Number of rate-limited requeues recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Clear the backoff state of `key`
    pub fn forget(&self, key: &str) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by [`WorkQueue::get`] as finished
    pub fn done(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys ready to be processed
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Enqueue for WorkQueue {
    fn enqueue(&self, key: &str) {
        self.add(key);
    }
}
