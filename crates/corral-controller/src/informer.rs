use crate::cache::{Change, ResourceCache};
use crate::client::ClusterClient;
use crate::error::Result;
use crate::events::{ControllerEvent, EventTranslator};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps the resource cache current by periodically relisting the namespace
///
/// Every pass lists replicas, pods and jobs, swaps them into the cache and
/// feeds the differences to the event translator. Replicas are applied first
/// so owner lookups for children see the latest replica uids. Objects that
/// did not change are still reported to the translator, which makes each
/// relist a full resync of the replica keys.
pub struct Informer {
    client: Arc<dyn ClusterClient>,
    cache: Arc<ResourceCache>,
    translator: Arc<EventTranslator>,
    namespace: String,
    resync_interval: Duration,
}

impl Informer {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        cache: Arc<ResourceCache>,
        translator: Arc<EventTranslator>,
        namespace: impl Into<String>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            translator,
            namespace: namespace.into(),
            resync_interval,
        }
    }

    /// Relist every watched resource once
    pub async fn resync_once(&self) -> Result<()> {
        let replicas = self.client.list_replicas(&self.namespace).await?;
        let pods = self.client.list_pods(&self.namespace).await?;
        let jobs = self.client.list_jobs(&self.namespace).await?;
        debug!(
            "Listed {} replicas, {} pods, {} jobs in {}",
            replicas.len(),
            pods.len(),
            jobs.len(),
            self.namespace
        );

        for change in self.cache.replicas.replace(replicas) {
            self.translator.handle(&match change {
                Change::Added(r) => ControllerEvent::ReplicaAdded(r),
                Change::Updated { old, new } => ControllerEvent::ReplicaUpdated { old, new },
                Change::Deleted(r) => ControllerEvent::ReplicaDeleted(r),
            });
        }
        for change in self.cache.pods.replace(pods) {
            self.translator.handle(&match change {
                Change::Added(p) => ControllerEvent::WorkloadAdded(p),
                Change::Updated { old, new } => ControllerEvent::WorkloadUpdated { old, new },
                Change::Deleted(p) => ControllerEvent::WorkloadDeleted(p),
            });
        }
        for change in self.cache.jobs.replace(jobs) {
            self.translator.handle(&match change {
                Change::Added(j) => ControllerEvent::CleanupJobAdded(j),
                Change::Updated { old, new } => ControllerEvent::CleanupJobUpdated { old, new },
                Change::Deleted(j) => ControllerEvent::CleanupJobDeleted(j),
            });
        }
        Ok(())
    }

    /// Relist until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting informer for namespace '{}' (resync every {:?})",
            self.namespace, self.resync_interval
        );

        loop {
            if let Err(e) = self.resync_once().await {
                warn!("Informer relist failed: {}", e);
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Informer shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.resync_interval) => {}
            }
        }
    }
}
