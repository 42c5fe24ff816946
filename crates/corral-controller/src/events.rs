use crate::cache::ResourceCache;
use crate::queue::Enqueue;
use corral_core::{controller_of, Job, ObjectMeta, Pod, Replica, Resource};
use std::sync::Arc;
use tracing::{debug, trace};

/// A change observed on one of the watched resources
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ReplicaAdded(Replica),
    ReplicaUpdated { old: Replica, new: Replica },
    ReplicaDeleted(Replica),
    WorkloadAdded(Pod),
    WorkloadUpdated { old: Pod, new: Pod },
    WorkloadDeleted(Pod),
    CleanupJobAdded(Job),
    CleanupJobUpdated { old: Job, new: Job },
    CleanupJobDeleted(Job),
}

/// Maps watch events onto replica keys and enqueues them
pub struct EventTranslator {
    cache: Arc<ResourceCache>,
    enqueue: Arc<dyn Enqueue>,
}

impl EventTranslator {
    pub fn new(cache: Arc<ResourceCache>, enqueue: Arc<dyn Enqueue>) -> Self {
        Self { cache, enqueue }
    }

    /// Translate and enqueue an event
    pub fn handle(&self, event: &ControllerEvent) {
        if let Some(key) = self.translate(event) {
            trace!(key = %key, "Enqueueing replica");
            self.enqueue.enqueue(&key);
        }
    }

    /// Replica key an event should trigger a sync for, if any
    pub fn translate(&self, event: &ControllerEvent) -> Option<String> {
        match event {
            ControllerEvent::ReplicaAdded(replica)
            | ControllerEvent::ReplicaUpdated { new: replica, .. }
            | ControllerEvent::ReplicaDeleted(replica) => replica.queue_key().ok(),

            ControllerEvent::WorkloadAdded(pod) => {
                if pod.is_being_deleted() {
                    return self.translate(&ControllerEvent::WorkloadDeleted(pod.clone()));
                }
                self.resolve_owner(&pod.metadata)
            }
            ControllerEvent::WorkloadUpdated { old, new } => {
                if old.resource_version() == new.resource_version() {
                    return None;
                }
                if new.is_being_deleted() {
                    return self.translate(&ControllerEvent::WorkloadDeleted(new.clone()));
                }
                self.resolve_owner(&new.metadata)
            }
            ControllerEvent::WorkloadDeleted(pod) => self.resolve_owner(&pod.metadata),

            ControllerEvent::CleanupJobAdded(job) | ControllerEvent::CleanupJobDeleted(job) => {
                self.resolve_owner(&job.metadata)
            }
            ControllerEvent::CleanupJobUpdated { old, new } => {
                if old.resource_version() == new.resource_version() {
                    return None;
                }
                self.resolve_owner(&new.metadata)
            }
        }
    }

    /// Find the cached replica controlling a child object
    fn resolve_owner(&self, metadata: &ObjectMeta) -> Option<String> {
        let owner = controller_of(metadata)?;
        if owner.kind != Replica::gvk().kind {
            return None;
        }
        let namespace = metadata.namespace.as_deref().unwrap_or_default();
        let replica = self.cache.replicas.get(namespace, &owner.name)?;
        if replica.uid() != Some(owner.uid.as_str()) {
            debug!(
                "Ignoring {:?}: owner {} uid {} does not match cached replica",
                metadata.name, owner.name, owner.uid
            );
            return None;
        }
        replica.queue_key().ok()
    }
}
