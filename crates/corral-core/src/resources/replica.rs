use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API group of the Replica custom resource
pub const REPLICA_GROUP: &str = "longhorn.rancher.io";
/// API version of the Replica custom resource
pub const REPLICA_VERSION: &str = "v1alpha1";
/// Kind of the Replica custom resource
pub const REPLICA_KIND: &str = "Replica";

/// Lifecycle state of a replica instance, both desired and observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    #[default]
    Stopped,
    Unknown,
    Deleted,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown => "unknown",
            InstanceState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired configuration of a replica, owned by the volume controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub volume_size: String,
    #[serde(default)]
    pub engine_image: String,
    #[serde(default)]
    pub desire_state: InstanceState,
    /// Node the replica data lives on; empty until the workload is first scheduled
    #[serde(default, rename = "nodeID")]
    pub node_id: String,
    #[serde(default)]
    pub restore_from: String,
    #[serde(default)]
    pub restore_name: String,
    /// Timestamp at which the workload was declared failed
    #[serde(default)]
    pub failed_at: String,
}

/// Observed state of a replica, owned by this controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    #[serde(default)]
    pub state: InstanceState,
}

/// A single storage replica of a Longhorn volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicaSpec,
    #[serde(default)]
    pub status: ReplicaStatus,
}

fn default_api_version() -> String {
    format!("{}/{}", REPLICA_GROUP, REPLICA_VERSION)
}

fn default_kind() -> String {
    REPLICA_KIND.to_string()
}

impl Default for Replica {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: ReplicaSpec::default(),
            status: ReplicaStatus::default(),
        }
    }
}

impl Replica {
    /// Create a replica with the given namespace, name and spec
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ReplicaSpec) -> Self {
        let mut replica = Self {
            spec,
            ..Default::default()
        };
        replica.metadata.namespace = Some(namespace.into());
        replica.metadata.name = Some(name.into());
        replica
    }

    /// Name of the replica, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the replica, empty if unset
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Whether the replica has been scheduled onto a node at least once
    pub fn is_placed(&self) -> bool {
        !self.spec.node_id.is_empty()
    }

    /// Whether the replica's workload has been declared failed
    pub fn has_failed(&self) -> bool {
        !self.spec.failed_at.is_empty()
    }

    /// Restore source, only when both the backup URL and name are set
    pub fn restore_source(&self) -> Option<(&str, &str)> {
        if self.spec.restore_from.is_empty() || self.spec.restore_name.is_empty() {
            None
        } else {
            Some((&self.spec.restore_from, &self.spec.restore_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_deserializes_wire_names() {
        let json = serde_json::json!({
            "apiVersion": "longhorn.rancher.io/v1alpha1",
            "kind": "Replica",
            "metadata": {"name": "vol-r-1", "namespace": "longhorn-system"},
            "spec": {
                "volumeName": "vol",
                "volumeSize": "10737418240",
                "engineImage": "rancher/longhorn-engine:v0.2",
                "desireState": "running",
                "nodeID": "node-1",
                "failedAt": ""
            },
            "status": {"state": "stopped"}
        });

        let replica: Replica = serde_json::from_value(json).unwrap();
        assert_eq!(replica.name(), "vol-r-1");
        assert_eq!(replica.namespace(), "longhorn-system");
        assert_eq!(replica.spec.desire_state, InstanceState::Running);
        assert_eq!(replica.spec.node_id, "node-1");
        assert_eq!(replica.status.state, InstanceState::Stopped);
        assert!(replica.is_placed());
        assert!(!replica.has_failed());
    }

    #[test]
    fn test_replica_missing_status_defaults_to_stopped() {
        let json = serde_json::json!({"metadata": {"name": "r"}, "spec": {"desireState": "deleted"}});
        let replica: Replica = serde_json::from_value(json).unwrap();
        assert_eq!(replica.kind, "Replica");
        assert_eq!(replica.api_version, "longhorn.rancher.io/v1alpha1");
        assert_eq!(replica.status.state, InstanceState::Stopped);
        assert_eq!(replica.spec.desire_state, InstanceState::Deleted);
    }

    #[test]
    fn test_restore_source_requires_both_fields() {
        let mut replica = Replica::new("ns", "r", ReplicaSpec::default());
        replica.spec.restore_from = "s3://backups".to_string();
        assert!(replica.restore_source().is_none());

        replica.spec.restore_name = "backup-1".to_string();
        assert_eq!(replica.restore_source(), Some(("s3://backups", "backup-1")));
    }

    #[test]
    fn test_node_id_serializes_with_upper_case_id() {
        let mut replica = Replica::new("ns", "r", ReplicaSpec::default());
        replica.spec.node_id = "node-2".to_string();
        let value = serde_json::to_value(&replica).unwrap();
        assert_eq!(value["spec"]["nodeID"], "node-2");
        assert_eq!(value["spec"]["desireState"], "stopped");
    }
}
