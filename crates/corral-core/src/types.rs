use crate::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "batch", "longhorn.rancher.io")
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "Replica")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Get the full API path segment
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else if lower.ends_with('y') {
            format!("{}ies", &lower[..lower.len() - 1])
        } else {
            format!("{}s", lower)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey identifies a specific namespaced resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(gvk: GroupVersionKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The `namespace/name` work queue key for this resource
    pub fn queue_key(&self) -> String {
        meta_namespace_key(&self.namespace, &self.name)
    }

    /// Get the API path for this resource
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// Get the API path for the collection (without name)
    pub fn collection_path(&self) -> String {
        collection_path(&self.gvk, &self.namespace)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
    }
}

/// API path of a namespaced collection, e.g. `/api/v1/namespaces/default/pods`
pub fn collection_path(gvk: &GroupVersionKind, namespace: &str) -> String {
    format!(
        "/{}/namespaces/{}/{}",
        gvk.api_path(),
        namespace,
        gvk.resource_name()
    )
}

/// Build the `namespace/name` key used by the work queue
pub fn meta_namespace_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// Split a `namespace/name` key. A bare `name` yields an empty namespace.
pub fn split_meta_namespace_key(key: &str) -> Result<(String, String)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((String::new(), name.to_string())),
        (Some(namespace), Some(name), None) if !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(CorralError::invalid_key(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Pod");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("longhorn.rancher.io/v1alpha1", "Replica");
        assert_eq!(gvk.group, "longhorn.rancher.io");
        assert_eq!(gvk.version, "v1alpha1");
        assert_eq!(gvk.kind, "Replica");
        assert_eq!(gvk.api_version(), "longhorn.rancher.io/v1alpha1");
    }

    #[test]
    fn test_gvk_resource_name() {
        assert_eq!(GroupVersionKind::new("", "v1", "Pod").resource_name(), "pods");
        assert_eq!(GroupVersionKind::new("batch", "v1", "Job").resource_name(), "jobs");
        assert_eq!(
            GroupVersionKind::new("longhorn.rancher.io", "v1alpha1", "Replica").resource_name(),
            "replicas"
        );
    }

    #[test]
    fn test_resource_key_api_path() {
        let gvk = GroupVersionKind::new("batch", "v1", "Job");
        let key = ResourceKey::new(gvk, "longhorn-system", "r-1");
        assert_eq!(
            key.api_path(),
            "/apis/batch/v1/namespaces/longhorn-system/jobs/r-1"
        );
        assert_eq!(
            key.collection_path(),
            "/apis/batch/v1/namespaces/longhorn-system/jobs"
        );
        assert_eq!(key.queue_key(), "longhorn-system/r-1");
    }

    #[test]
    fn test_split_meta_namespace_key() {
        assert_eq!(
            split_meta_namespace_key("ns/name").unwrap(),
            ("ns".to_string(), "name".to_string())
        );
        assert_eq!(
            split_meta_namespace_key("name").unwrap(),
            (String::new(), "name".to_string())
        );
        assert!(split_meta_namespace_key("a/b/c").is_err());
        assert!(split_meta_namespace_key("ns/").is_err());
        assert!(split_meta_namespace_key("").is_err());
    }

    #[test]
    fn test_meta_namespace_key_round_trips_split() {
        let key = meta_namespace_key("default", "replica-a");
        assert_eq!(key, "default/replica-a");
        let (ns, name) = split_meta_namespace_key(&key).unwrap();
        assert_eq!(ns, "default");
        assert_eq!(name, "replica-a");
    }
}
