use crate::cache::ResourceCache;
use crate::client::ClusterClient;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::finalizer::remove_finalizers;
use crate::lifecycle::{CleanupOutcome, WorkloadManager};
use crate::queue::Enqueue;
use crate::recorder::{EventKind, EventRecorder};
use async_trait::async_trait;
use corral_core::{split_meta_namespace_key, InstanceState, Replica, Resource};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handles one work queue key
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, key: &str) -> Result<()>;
}

/// Persists a modified replica
#[async_trait]
pub trait ReplicaUpdater: Send + Sync {
    async fn update(&self, replica: &Replica) -> Result<Replica>;
}

/// Writes replicas straight to the cluster
pub struct ClientReplicaUpdater {
    client: Arc<dyn ClusterClient>,
}

impl ClientReplicaUpdater {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplicaUpdater for ClientReplicaUpdater {
    async fn update(&self, replica: &Replica) -> Result<Replica> {
        self.client.update_replica(replica).await
    }
}

/// Observed instance state implied by a workload pod phase
pub fn state_from_phase(phase: Option<&str>) -> InstanceState {
    match phase {
        Some("Pending") => InstanceState::Stopped,
        Some("Running") => InstanceState::Running,
        _ => InstanceState::Unknown,
    }
}

/// Drives each replica toward its desired instance state
///
/// One pass reads the replica and its pod from the cache, derives
/// `status.state` from the pod, then takes at most one step: persist a forced
/// desired state, start or stop the pod, advance the cleanup job, or release
/// the finalizers. Each step that changes the replica enqueues it again so
/// the next step runs against fresh state.
pub struct ReplicaReconciler {
    namespace: String,
    client: Arc<dyn ClusterClient>,
    cache: Arc<ResourceCache>,
    updater: Arc<dyn ReplicaUpdater>,
    enqueue: Arc<dyn Enqueue>,
    recorder: Arc<dyn EventRecorder>,
    workloads: WorkloadManager,
}

impl ReplicaReconciler {
    pub fn new(
        config: &ControllerConfig,
        client: Arc<dyn ClusterClient>,
        cache: Arc<ResourceCache>,
        updater: Arc<dyn ReplicaUpdater>,
        enqueue: Arc<dyn Enqueue>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            namespace: config.namespace.clone(),
            workloads: WorkloadManager::new(
                client.clone(),
                config.namespace.clone(),
                config.data_directory.clone(),
            ),
            client,
            cache,
            updater,
            enqueue,
            recorder,
        }
    }

    fn enqueue_replica(&self, replica: &Replica) {
        match replica.queue_key() {
            Ok(key) => self.enqueue.enqueue(&key),
            Err(e) => error!("Couldn't get key for replica: {}", e),
        }
    }

    /// Derive `status.state` from the cached pod.
    ///
    /// `Deleted` is only ever set after a successful cleanup, and stays put
    /// while no pod exists and deletion is still desired.
    fn sync_observed_state(&self, replica: &mut Replica) {
        let state = match self.cache.pods.get(&self.namespace, replica.name()) {
            None if replica.status.state == InstanceState::Deleted
                && replica.spec.desire_state == InstanceState::Deleted =>
            {
                InstanceState::Deleted
            }
            None => InstanceState::Stopped,
            Some(pod) => {
                let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
                let state = state_from_phase(phase);
                if state == InstanceState::Unknown {
                    warn!(
                        "Volume {} replica {} instance state is failed/unknown, pod phase {:?}",
                        replica.spec.volume_name,
                        replica.name(),
                        phase
                    );
                }
                state
            }
        };
        replica.status.state = state;
    }

    /// Persist and refresh the cached copy so the next pass sees the write
    async fn persist(&self, replica: &Replica) -> Result<Replica> {
        let updated = self.updater.update(replica).await?;
        self.cache.replicas.upsert(updated.clone());
        Ok(updated)
    }

    async fn persist_and_requeue(&self, replica: &Replica) -> Result<()> {
        let updated = self.persist(replica).await?;
        self.enqueue_replica(&updated);
        Ok(())
    }

    async fn reconcile(&self, mut replica: Replica) -> Result<()> {
        self.sync_observed_state(&mut replica);

        let desired = replica.spec.desire_state;
        if replica.has_failed()
            && desired != InstanceState::Stopped
            && !(desired == InstanceState::Deleted && replica.is_being_deleted())
        {
            info!(
                "Replica {} failed at {}, stopping it",
                replica.name(),
                replica.spec.failed_at
            );
            replica.spec.desire_state = InstanceState::Stopped;
            self.persist_and_requeue(&replica).await?;
            self.recorder.record(
                &replica,
                EventKind::Warning,
                "FailedDetected",
                &format!("Replica failed at {}", replica.spec.failed_at),
            );
            return Ok(());
        }

        if replica.is_being_deleted() && desired != InstanceState::Deleted {
            info!("Replica {} is being deleted", replica.name());
            replica.spec.desire_state = InstanceState::Deleted;
            return self.persist_and_requeue(&replica).await;
        }

        let state = replica.status.state;
        if desired == InstanceState::Deleted && state == InstanceState::Deleted {
            remove_finalizers(
                self.client.as_ref(),
                self.updater.as_ref(),
                &self.namespace,
                replica.name(),
            )
            .await?;
            self.recorder
                .record(&replica, EventKind::Normal, "Deleted", "Replica released");
            return Ok(());
        }

        if state == desired {
            debug!("Replica {} is {}", replica.name(), state);
            return Ok(());
        }

        match (state, desired) {
            (InstanceState::Stopped, InstanceState::Running) => self.start(&replica).await,
            (InstanceState::Running, InstanceState::Stopped)
            | (InstanceState::Running, InstanceState::Deleted) => self.stop(&replica).await,
            (InstanceState::Stopped, InstanceState::Deleted) => self.cleanup(replica).await,
            (state, desired) => {
                error!(
                    "Unknown replica transition for {}: current {}, desire {}",
                    replica.name(),
                    state,
                    desired
                );
                self.recorder.record(
                    &replica,
                    EventKind::Warning,
                    "InvalidTransition",
                    &format!("Cannot move from {} to {}", state, desired),
                );
                Ok(())
            }
        }
    }

    async fn start(&self, replica: &Replica) -> Result<()> {
        if self.cache.pods.get(&self.namespace, replica.name()).is_some() {
            debug!("Replica {} pod exists, waiting for it to run", replica.name());
            return Ok(());
        }
        match self.workloads.start_workload_instance(replica).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!("Replica {} pod already submitted", replica.name());
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.recorder.record(
            replica,
            EventKind::Normal,
            "Started",
            &format!("Started replica pod for volume {}", replica.spec.volume_name),
        );
        Ok(())
    }

    async fn stop(&self, replica: &Replica) -> Result<()> {
        self.workloads.stop_workload_instance(replica).await?;
        self.recorder.record(
            replica,
            EventKind::Normal,
            "Stopped",
            &format!("Stopped replica pod for volume {}", replica.spec.volume_name),
        );
        Ok(())
    }

    async fn cleanup(&self, mut replica: Replica) -> Result<()> {
        // A pending pod reads as stopped; it must be gone before the data is wiped
        if self.cache.pods.get(&self.namespace, replica.name()).is_some() {
            return self.stop(&replica).await;
        }

        match self.workloads.cleanup_replica_instance(&replica).await? {
            CleanupOutcome::Skipped => {
                info!(
                    "Replica {} was never placed, nothing to clean up",
                    replica.name()
                );
                replica.status.state = InstanceState::Deleted;
                self.persist_and_requeue(&replica).await
            }
            CleanupOutcome::Created => {
                self.recorder.record(
                    &replica,
                    EventKind::Normal,
                    "CleanupStarted",
                    &format!("Cleaning up replica data on {}", replica.spec.node_id),
                );
                Ok(())
            }
            CleanupOutcome::InProgress => {
                debug!("Cleanup for replica {} in progress", replica.name());
                Ok(())
            }
            CleanupOutcome::Completed { succeeded: true } => {
                info!(
                    "Cleanup for volume {} replica {} succeeded",
                    replica.spec.volume_name,
                    replica.name()
                );
                replica.status.state = InstanceState::Deleted;
                let updated = self.persist(&replica).await?;
                self.workloads.delete_cleanup_job(&replica).await;
                self.recorder.record(
                    &replica,
                    EventKind::Normal,
                    "CleanupSucceeded",
                    "Replica data removed",
                );
                self.enqueue_replica(&updated);
                Ok(())
            }
            CleanupOutcome::Completed { succeeded: false } => {
                warn!(
                    "Cleanup for volume {} replica {} failed",
                    replica.spec.volume_name,
                    replica.name()
                );
                self.workloads.delete_cleanup_job(&replica).await;
                self.recorder.record(
                    &replica,
                    EventKind::Warning,
                    "CleanupFailed",
                    &format!("Cleanup job on {} failed", replica.spec.node_id),
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SyncHandler for ReplicaReconciler {
    async fn sync(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_meta_namespace_key(key)?;
        if namespace != self.namespace {
            debug!("Ignoring replica {} outside namespace {}", key, self.namespace);
            return Ok(());
        }

        let Some(replica) = self.cache.replicas.get(&namespace, &name) else {
            info!("Longhorn replica {} has been deleted", key);
            return Ok(());
        };
        self.reconcile(replica).await
    }
}
