use crate::error::{ControllerError, Result};
use corral_core::{meta_namespace_key, Job, Pod, Replica, Resource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Difference between the cached and freshly listed copy of an object
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

/// Local read cache of one resource type, keyed by `namespace/name`
pub struct Store<T> {
    items: RwLock<HashMap<String, T>>,
    synced: AtomicBool,
}

impl<T: Resource> Default for Store<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }
}

impl<T: Resource> Store<T> {
    /// Point lookup. Returns an owned copy the caller may mutate freely.
    pub fn get(&self, namespace: &str, name: &str) -> Option<T> {
        self.items
            .read()
            .get(&meta_namespace_key(namespace, name))
            .cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether one full list has been applied
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Store an object this controller just wrote, ahead of the next relist
    pub fn upsert(&self, item: T) {
        match item.queue_key() {
            Ok(key) => {
                self.items.write().insert(key, item);
            }
            Err(e) => debug!("Not caching unnamed {}: {}", T::gvk().kind, e),
        }
    }

    /// Replace the cache contents with a full listing and report what changed.
    ///
    /// Objects present in both copies are reported as updates even when their
    /// resource version is unchanged, so every relist doubles as a resync.
    pub fn replace(&self, listed: Vec<T>) -> Vec<Change<T>> {
        let mut fresh = HashMap::with_capacity(listed.len());
        for item in listed {
            match item.queue_key() {
                Ok(key) => {
                    fresh.insert(key, item);
                }
                Err(e) => debug!("Skipping unnamed {} in listing: {}", T::gvk().kind, e),
            }
        }

        let mut items = self.items.write();
        let mut changes = Vec::new();

        for (key, new) in fresh.iter() {
            match items.get(key) {
                Some(old) => changes.push(Change::Updated {
                    old: old.clone(),
                    new: new.clone(),
                }),
                None => changes.push(Change::Added(new.clone())),
            }
        }
        for (key, old) in items.iter() {
            if !fresh.contains_key(key) {
                changes.push(Change::Deleted(old.clone()));
            }
        }

        *items = fresh;
        self.synced.store(true, Ordering::Release);
        changes
    }
}

/// Listers for every resource type the reconciler reads
#[derive(Default)]
pub struct ResourceCache {
    pub replicas: Store<Replica>,
    pub pods: Store<Pod>,
    pub jobs: Store<Job>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_synced(&self) -> bool {
        self.replicas.has_synced() && self.pods.has_synced() && self.jobs.has_synced()
    }

    /// Block until every store has completed its first full list.
    ///
    /// Returns `Ok(false)` if `token` is cancelled first.
    pub async fn wait_for_sync(&self, token: &CancellationToken, timeout: Duration) -> Result<bool> {
        info!("Waiting for replica, pod and job caches to sync");
        let poll = async {
            while !self.has_synced() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        tokio::select! {
            _ = token.cancelled() => Ok(false),
            result = tokio::time::timeout(timeout, poll) => match result {
                Ok(()) => {
                    info!("Caches are synced");
                    Ok(true)
                }
                Err(_) => Err(ControllerError::cache_sync_failed(
                    "longhorn replicas",
                    format!("timed out after {:?}", timeout),
                )),
            },
        }
    }
}
