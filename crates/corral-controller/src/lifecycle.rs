use crate::client::ClusterClient;
use crate::error::Result;
use crate::templates::{cleanup_job, pod_template};
use corral_core::{Job, Replica};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of the data cleanup for a replica being deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The replica never ran on a node, nothing to wipe
    Skipped,
    /// A cleanup job was submitted
    Created,
    /// The cleanup job exists but has not finished
    InProgress,
    /// The cleanup job finished. The job itself is still present.
    Completed { succeeded: bool },
}

/// Whether a job has reached a terminal state
pub fn job_completed(job: &Job) -> bool {
    let Some(status) = job.status.as_ref() else {
        return false;
    };
    if status.completion_time.is_some() {
        return true;
    }
    status.conditions.iter().flatten().any(|c| {
        (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True"
    })
}

/// Whether at least one pod of the job succeeded
pub fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .is_some_and(|n| n > 0)
}

/// Creates and removes the pods and jobs backing replicas
pub struct WorkloadManager {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    data_directory: String,
}

impl WorkloadManager {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        data_directory: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            data_directory: data_directory.into(),
        }
    }

    /// Submit the replica pod
    pub async fn start_workload_instance(&self, replica: &Replica) -> Result<()> {
        let pod = pod_template(replica, &self.data_directory)?;
        debug!(
            "Starting replica {} for volume {}",
            replica.name(),
            replica.spec.volume_name
        );
        self.client.create_pod(&self.namespace, &pod).await?;
        Ok(())
    }

    /// Delete the replica pod. A pod that is already gone counts as stopped.
    pub async fn stop_workload_instance(&self, replica: &Replica) -> Result<()> {
        debug!(
            "Stopping replica {} for volume {}",
            replica.name(),
            replica.spec.volume_name
        );
        match self.client.delete_pod(&self.namespace, replica.name()).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Drive the cleanup job one step forward
    pub async fn cleanup_replica_instance(&self, replica: &Replica) -> Result<CleanupOutcome> {
        if !replica.is_placed() {
            return Ok(CleanupOutcome::Skipped);
        }

        let job = match self.client.get_job(&self.namespace, replica.name()).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                let job = cleanup_job(replica, &self.data_directory)?;
                return match self.client.create_job(&self.namespace, &job).await {
                    Ok(_) => {
                        info!(
                            "Created cleanup job for volume {} replica {} on {}",
                            replica.spec.volume_name,
                            replica.name(),
                            replica.spec.node_id
                        );
                        Ok(CleanupOutcome::Created)
                    }
                    Err(e) if e.is_already_exists() => Ok(CleanupOutcome::InProgress),
                    Err(e) => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        if !job_completed(&job) {
            return Ok(CleanupOutcome::InProgress);
        }
        Ok(CleanupOutcome::Completed {
            succeeded: job_succeeded(&job),
        })
    }

    /// Remove a finished cleanup job. Failures are logged, never returned.
    pub async fn delete_cleanup_job(&self, replica: &Replica) {
        match self.client.delete_job(&self.namespace, replica.name()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(
                "Failed to delete the cleanup job for {}: {}",
                replica.name(),
                e
            ),
        }
    }
}
