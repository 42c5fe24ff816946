//! Corral Core - Resource types shared by the Corral replica controller
//!
//! This crate provides:
//! - The `Replica` custom resource and its instance states
//! - A `Resource` trait over the Kubernetes objects the controller touches
//! - Owner reference helpers and `namespace/name` key handling
//! - Error types with miette diagnostics

pub mod error;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{CorralError, Result};
pub use resources::{
    controller_of, is_valid_name, new_controller_ref, InstanceState, Replica, ReplicaSpec,
    ReplicaStatus, Resource,
};
pub use types::{meta_namespace_key, split_meta_namespace_key, GroupVersionKind, ResourceKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::batch::v1::Job;
pub use k8s_openapi::api::core::v1::{Event, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        CorralError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CorralError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_manifest_parsing() {
        let yaml = r#"
apiVersion: longhorn.rancher.io/v1alpha1
kind: Replica
metadata:
  name: vol-r-2
  namespace: longhorn-system
spec:
  volumeName: vol
  volumeSize: "1073741824"
  engineImage: rancher/longhorn-engine:latest
  desireState: running
"#;
        let replica: Replica = from_yaml(yaml).unwrap();
        assert_eq!(replica.spec.volume_name, "vol");
        assert_eq!(replica.spec.desire_state, InstanceState::Running);
        assert!(!replica.is_placed());
    }

    #[test]
    fn test_invalid_yaml_is_serialization_error() {
        let result: Result<Replica> = from_yaml("spec: [unclosed");
        assert!(matches!(
            result.unwrap_err(),
            CorralError::SerializationError { .. }
        ));
    }
}
