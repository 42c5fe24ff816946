use crate::client::ClusterClient;
use crate::error::Result;
use crate::reconciler::ReplicaUpdater;
use corral_core::Resource;
use tracing::{debug, info};

/// Release a replica so the API server can remove it
///
/// Reads the replica live rather than from the cache, clears every finalizer
/// and persists the result. When nothing had requested deletion yet the
/// replica is deleted explicitly. Safe to repeat: a missing replica counts as
/// done.
pub async fn remove_finalizers(
    client: &dyn ClusterClient,
    updater: &dyn ReplicaUpdater,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let current = match client.get_replica(namespace, name).await {
        Ok(replica) => replica,
        Err(e) if e.is_not_found() => {
            debug!("Replica {}/{} already gone", namespace, name);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut released = current.clone();
    released.metadata.finalizers = Some(Vec::new());
    let persisted = match updater.update(&released).await {
        Ok(replica) => replica,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    if !persisted.is_being_deleted() {
        info!("Deleting replica {}/{}", namespace, name);
        match client.delete_replica(namespace, name).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, Mutation};
    use crate::reconciler::ClientReplicaUpdater;
    use corral_core::{Replica, ReplicaSpec};
    use std::sync::Arc;

    fn with_finalizer() -> Replica {
        let mut replica = Replica::new("ns", "vol-r-1", ReplicaSpec::default());
        replica.metadata.finalizers = Some(vec!["longhorn.rancher.io".to_string()]);
        replica
    }

    #[tokio::test]
    async fn test_deleting_replica_is_released_without_extra_delete() {
        let cluster = MockCluster::new();
        cluster.insert_replica(with_finalizer()).await.unwrap();
        cluster.delete_replica("ns", "vol-r-1").await.unwrap();
        cluster.clear_mutations().await;

        let updater = ClientReplicaUpdater::new(Arc::new(cluster.clone()));
        remove_finalizers(&cluster, &updater, "ns", "vol-r-1")
            .await
            .unwrap();

        assert!(cluster.replica("ns", "vol-r-1").await.is_none());
        assert_eq!(
            cluster.mutations().await,
            vec![Mutation::UpdateReplica("ns/vol-r-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_undeleted_replica_is_deleted_explicitly() {
        let cluster = MockCluster::new();
        cluster.insert_replica(with_finalizer()).await.unwrap();

        let updater = ClientReplicaUpdater::new(Arc::new(cluster.clone()));
        remove_finalizers(&cluster, &updater, "ns", "vol-r-1")
            .await
            .unwrap();

        assert!(cluster.replica("ns", "vol-r-1").await.is_none());
        assert_eq!(
            cluster.mutations().await,
            vec![
                Mutation::UpdateReplica("ns/vol-r-1".to_string()),
                Mutation::DeleteReplica("ns/vol-r-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_replica_is_done() {
        let cluster = MockCluster::new();
        let updater = ClientReplicaUpdater::new(Arc::new(cluster.clone()));
        remove_finalizers(&cluster, &updater, "ns", "gone")
            .await
            .unwrap();
        assert!(cluster.mutations().await.is_empty());
    }
}
