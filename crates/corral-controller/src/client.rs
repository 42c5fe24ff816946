use crate::error::Result;
use async_trait::async_trait;
use corral_core::{Event, Job, Pod, Replica};

/// Trait for the cluster API operations the controller performs
///
/// All calls are namespace-scoped. Implementations map a missing object to
/// `ControllerError::NotFound`, a stale `resourceVersion` on update to
/// `ControllerError::Conflict` and a duplicate create to
/// `ControllerError::AlreadyExists`. `ApiClient` talks to a real API server;
/// `MockCluster` keeps everything in memory for tests and local simulation.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    // --- Replicas ---

    /// Fetch a replica directly from the API server, bypassing any cache
    async fn get_replica(&self, namespace: &str, name: &str) -> Result<Replica>;

    async fn list_replicas(&self, namespace: &str) -> Result<Vec<Replica>>;

    /// Replace a replica; rejected with `Conflict` if its resourceVersion is stale
    async fn update_replica(&self, replica: &Replica) -> Result<Replica>;

    /// Request deletion of a replica. Finalizers keep it readable until cleared.
    async fn delete_replica(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Pods ---

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Jobs ---

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// Delete a job together with the pods it spawned
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Events ---

    async fn create_event(&self, namespace: &str, event: &Event) -> Result<Event>;
}
