use crate::client::ClusterClient;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use corral_core::k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
use corral_core::k8s_openapi::api::core::v1::PodStatus;
use corral_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use corral_core::{
    controller_of, is_valid_name, meta_namespace_key, Event, Job, Pod, Replica, Resource,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A mutating call made against the mock cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    UpdateReplica(String),
    DeleteReplica(String),
    CreatePod(String),
    DeletePod(String),
    CreateJob(String),
    DeleteJob(String),
}

#[derive(Default)]
struct MockState {
    replicas: HashMap<String, Replica>,
    pods: HashMap<String, Pod>,
    jobs: HashMap<String, Job>,
    events: Vec<Event>,
    mutations: Vec<Mutation>,
    next_version: u64,
    pending_conflicts: u32,
}

impl MockState {
    fn stamp<T: Resource>(&mut self, obj: &mut T) {
        self.next_version += 1;
        obj.metadata_mut().resource_version = Some(self.next_version.to_string());
    }

    fn admit<T: Resource>(&mut self, namespace: &str, obj: &mut T) -> Result<String> {
        let name = obj.metadata().name.clone().unwrap_or_default();
        if !is_valid_name(&name) {
            return Err(ControllerError::CoreError(
                corral_core::CorralError::invalid_resource(
                    format!("invalid {} name '{}'", T::gvk().kind, name),
                    "Names must be lowercase DNS-1123 subdomains",
                ),
            ));
        }
        let metadata = obj.metadata_mut();
        metadata.namespace = Some(namespace.to_string());
        metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        metadata.creation_timestamp = Some(Time(Utc::now()));
        metadata.deletion_timestamp = None;
        self.stamp(obj);
        Ok(meta_namespace_key(namespace, &name))
    }

    /// Remove a replica and garbage-collect the children it controls
    fn purge_replica(&mut self, key: &str) {
        let Some(replica) = self.replicas.remove(key) else {
            return;
        };
        let uid = replica.metadata.uid.clone();
        let owned_by = |meta: &corral_core::ObjectMeta| {
            controller_of(meta).map(|r| Some(&r.uid) == uid.as_ref()) == Some(true)
        };
        self.pods.retain(|_, pod| !owned_by(&pod.metadata));
        self.jobs.retain(|_, job| !owned_by(&job.metadata));
        debug!("Mock: replica {} removed", key);
    }
}

/// In-memory cluster for tests and local simulation
///
/// Emulates the API server behaviours the controller relies on: UID and
/// resourceVersion assignment, optimistic concurrency on replica updates,
/// finalizers holding deleted replicas, and owner-reference garbage collection
/// of pods and jobs when their replica is removed. Pods start `Pending` and
/// jobs start incomplete; tests advance them with [`MockCluster::set_pod_phase`]
/// and [`MockCluster::finish_job`].
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a replica as if created by the volume controller
    pub async fn insert_replica(&self, mut replica: Replica) -> Result<Replica> {
        let mut state = self.state.write().await;
        let namespace = replica.namespace().to_string();
        let key = state.admit(&namespace, &mut replica)?;
        if state.replicas.contains_key(&key) {
            return Err(ControllerError::already_exists("Replica", key));
        }
        state.replicas.insert(key, replica.clone());
        Ok(replica)
    }

    pub async fn replica(&self, namespace: &str, name: &str) -> Option<Replica> {
        let state = self.state.read().await;
        state
            .replicas
            .get(&meta_namespace_key(namespace, name))
            .cloned()
    }

    pub async fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = self.state.read().await;
        state.pods.get(&meta_namespace_key(namespace, name)).cloned()
    }

    pub async fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        let state = self.state.read().await;
        state.jobs.get(&meta_namespace_key(namespace, name)).cloned()
    }

    /// Events recorded through `create_event`
    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Mutating calls received so far, in order
    pub async fn mutations(&self) -> Vec<Mutation> {
        self.state.read().await.mutations.clone()
    }

    pub async fn clear_mutations(&self) {
        self.state.write().await.mutations.clear();
    }

    /// Make the next `count` replica updates fail with a conflict
    pub async fn inject_update_conflicts(&self, count: u32) {
        self.state.write().await.pending_conflicts = count;
    }

    /// Externally edit a replica, bumping its resourceVersion
    pub async fn edit_replica<F>(&self, namespace: &str, name: &str, edit: F) -> Result<Replica>
    where
        F: FnOnce(&mut Replica) + Send,
    {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        let mut replica = state
            .replicas
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Replica", &key))?;
        edit(&mut replica);
        state.stamp(&mut replica);
        state.replicas.insert(key, replica.clone());
        Ok(replica)
    }

    /// Move a pod to the given phase, as the kubelet would
    pub async fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        let mut pod = state
            .pods
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Pod", &key))?;
        pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
        state.stamp(&mut pod);
        state.pods.insert(key, pod);
        Ok(())
    }

    /// Complete a job, as the job controller would
    pub async fn finish_job(&self, namespace: &str, name: &str, succeeded: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        let mut job = state
            .jobs
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Job", &key))?;
        let now = Time(Utc::now());
        let status = job.status.get_or_insert_with(JobStatus::default);
        if succeeded {
            status.succeeded = Some(1);
            status.completion_time = Some(now.clone());
        } else {
            status.failed = Some(2);
        }
        status.conditions = Some(vec![JobCondition {
            type_: if succeeded { "Complete" } else { "Failed" }.to_string(),
            status: "True".to_string(),
            last_transition_time: Some(now),
            ..Default::default()
        }]);
        state.stamp(&mut job);
        state.jobs.insert(key, job);
        Ok(())
    }

    /// Advance every workload one step: pending pods start running and
    /// unfinished jobs succeed. Returns whether anything changed.
    pub async fn simulate_kubelet(&self) -> Result<bool> {
        let (pending_pods, active_jobs) = {
            let state = self.state.read().await;
            let pods: Vec<Pod> = state
                .pods
                .values()
                .filter(|p| {
                    p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Pending")
                })
                .cloned()
                .collect();
            let jobs: Vec<Job> = state
                .jobs
                .values()
                .filter(|j| j.status.as_ref().and_then(|s| s.conditions.as_ref()).is_none())
                .cloned()
                .collect();
            (pods, jobs)
        };

        for pod in &pending_pods {
            let key = pod.resource_key()?;
            self.set_pod_phase(&key.namespace, &key.name, "Running")
                .await?;
        }
        for job in &active_jobs {
            let key = job.resource_key()?;
            self.finish_job(&key.namespace, &key.name, true).await?;
        }
        Ok(!pending_pods.is_empty() || !active_jobs.is_empty())
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_replica(&self, namespace: &str, name: &str) -> Result<Replica> {
        let key = meta_namespace_key(namespace, name);
        self.state
            .read()
            .await
            .replicas
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Replica", key))
    }

    async fn list_replicas(&self, namespace: &str) -> Result<Vec<Replica>> {
        let state = self.state.read().await;
        Ok(state
            .replicas
            .values()
            .filter(|r| r.namespace() == namespace)
            .cloned()
            .collect())
    }

    async fn update_replica(&self, replica: &Replica) -> Result<Replica> {
        let mut state = self.state.write().await;
        let key = replica.queue_key()?;
        state.mutations.push(Mutation::UpdateReplica(key.clone()));

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(ControllerError::conflict("Replica", key));
        }

        let stored = state
            .replicas
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Replica", &key))?;

        if replica.resource_version().is_some()
            && replica.resource_version() != stored.resource_version()
        {
            return Err(ControllerError::conflict("Replica", key));
        }

        let mut updated = replica.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        state.stamp(&mut updated);

        if updated.is_being_deleted() && updated.finalizers().is_empty() {
            state.purge_replica(&key);
        } else {
            state.replicas.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn delete_replica(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        state.mutations.push(Mutation::DeleteReplica(key.clone()));

        let mut replica = state
            .replicas
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Replica", &key))?;

        if replica.finalizers().is_empty() {
            state.purge_replica(&key);
        } else if !replica.is_being_deleted() {
            replica.metadata.deletion_timestamp = Some(Time(Utc::now()));
            state.stamp(&mut replica);
            state.replicas.insert(key, replica);
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let state = self.state.read().await;
        Ok(state
            .pods
            .values()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.write().await;
        let mut pod = pod.clone();
        let key = state.admit(namespace, &mut pod)?;
        state.mutations.push(Mutation::CreatePod(key.clone()));
        if state.pods.contains_key(&key) {
            return Err(ControllerError::already_exists("Pod", key));
        }
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        state.mutations.push(Mutation::DeletePod(key.clone()));
        state
            .pods
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ControllerError::not_found("Pod", key))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        let key = meta_namespace_key(namespace, name);
        self.state
            .read()
            .await
            .jobs
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Job", key))
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let mut job = job.clone();
        let key = state.admit(namespace, &mut job)?;
        state.mutations.push(Mutation::CreateJob(key.clone()));
        if state.jobs.contains_key(&key) {
            return Err(ControllerError::already_exists("Job", key));
        }
        job.status = Some(JobStatus::default());
        state.jobs.insert(key, job.clone());
        Ok(job)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let key = meta_namespace_key(namespace, name);
        state.mutations.push(Mutation::DeleteJob(key.clone()));
        state
            .jobs
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ControllerError::not_found("Job", key))
    }

    async fn create_event(&self, namespace: &str, event: &Event) -> Result<Event> {
        let mut state = self.state.write().await;
        let mut event = event.clone();
        event.metadata.namespace = Some(namespace.to_string());
        state.events.push(event.clone());
        Ok(event)
    }
}
