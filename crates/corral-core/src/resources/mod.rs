pub mod replica;

pub use replica::{
    InstanceState, Replica, ReplicaSpec, ReplicaStatus, REPLICA_GROUP, REPLICA_KIND,
    REPLICA_VERSION,
};

use crate::error::{CorralError, Result};
use crate::types::{meta_namespace_key, GroupVersionKind, ResourceKey};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

/// Trait for the Kubernetes resources this controller reads and writes
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync {
    /// Get the GroupVersionKind of this resource type
    fn gvk() -> GroupVersionKind;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey> {
        let metadata = self.metadata();
        let name = metadata.name.as_ref().ok_or_else(|| {
            CorralError::invalid_resource(
                format!("{} has no metadata.name", Self::gvk().kind),
                "Set metadata.name on the object",
            )
        })?;
        let namespace = metadata.namespace.clone().unwrap_or_default();

        Ok(ResourceKey::new(Self::gvk(), namespace, name))
    }

    /// Get the `namespace/name` work queue key
    fn queue_key(&self) -> Result<String> {
        let key = self.resource_key()?;
        Ok(meta_namespace_key(&key.namespace, &key.name))
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    /// Get the UID
    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    /// Whether removal has been requested and the object is only held by finalizers
    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    /// Finalizers currently blocking physical deletion
    fn finalizers(&self) -> &[String] {
        self.metadata().finalizers.as_deref().unwrap_or_default()
    }
}

impl Resource for Replica {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new(REPLICA_GROUP, REPLICA_VERSION, REPLICA_KIND)
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Pod {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Pod")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Job {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("batch", "v1", "Job")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Event {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Event")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Return the owner reference flagged as the managing controller, if any
pub fn controller_of(metadata: &ObjectMeta) -> Option<&OwnerReference> {
    metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Build a controller owner reference pointing at `owner`
pub fn new_controller_ref<R: Resource>(owner: &R) -> Result<OwnerReference> {
    let gvk = R::gvk();
    let metadata = owner.metadata();
    let name = metadata.name.clone().ok_or_else(|| {
        CorralError::invalid_resource(
            format!("{} has no metadata.name", gvk.kind),
            "Owner objects must be named",
        )
    })?;
    let uid = metadata.uid.clone().ok_or_else(|| {
        CorralError::invalid_resource(
            format!("{} {} has no metadata.uid", gvk.kind, name),
            "Owner objects must have been persisted by the API server before children reference them",
        )
    })?;

    Ok(OwnerReference {
        api_version: gvk.api_version(),
        kind: gvk.kind,
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let alnum = |c: u8| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes.iter().all(|&c| alnum(c) || c == b'-' || c == b'.')
}
