use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Directory bind-mounted from the host to hold replica data
pub const DEFAULT_DATA_DIRECTORY: &str = "/var/lib/rancher/longhorn/";

/// Configuration for the replica controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Only replicas in this namespace are reconciled
    pub namespace: String,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Host directory under which `replicas/<name>` data directories live
    pub data_directory: String,
    /// Failed attempts tolerated per key before it is dropped from the queue
    pub max_retries: u32,
    /// First retry delay; doubles on each subsequent failure
    #[serde(with = "duration_millis")]
    pub base_retry_delay: Duration,
    /// Upper bound on the retry delay
    #[serde(with = "duration_millis")]
    pub max_retry_delay: Duration,
    /// Interval between full relists of the watched resources
    #[serde(with = "duration_millis")]
    pub resync_interval: Duration,
    /// How long startup waits for the first full list before giving up
    #[serde(with = "duration_millis")]
    pub cache_sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "longhorn-system".to_string(),
            workers: 5,
            data_directory: DEFAULT_DATA_DIRECTORY.to_string(),
            max_retries: 3,
            base_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_secs(1000),
            resync_interval: Duration::from_secs(30),
            cache_sync_timeout: Duration::from_secs(60),
        }
    }
}

impl ControllerConfig {
    /// Load a YAML configuration file. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::invalid_config(
                format!("Failed to read config file '{}': {}", path.display(), e),
                "Check the --config path and file permissions",
            )
        })?;
        let config: Self = corral_core::from_yaml(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(ControllerError::invalid_config(
                "namespace must not be empty",
                "Set the namespace the replicas live in, e.g. longhorn-system",
            ));
        }
        if self.workers == 0 {
            return Err(ControllerError::invalid_config(
                "workers must be at least 1",
                "Use --workers 1 or more",
            ));
        }
        if !self.data_directory.starts_with('/') {
            return Err(ControllerError::invalid_config(
                format!("data directory '{}' is not absolute", self.data_directory),
                "The data directory is a host path and must start with '/'",
            ));
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(ControllerError::invalid_config(
                "baseRetryDelay exceeds maxRetryDelay",
                "Lower baseRetryDelay or raise maxRetryDelay",
            ));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_original_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.data_directory, "/var/lib/rancher/longhorn/");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_retry_delay, Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace: storage").unwrap();
        writeln!(file, "workers: 2").unwrap();
        writeln!(file, "baseRetryDelay: 50").unwrap();

        let config = ControllerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.workers, 2);
        assert_eq!(config.base_retry_delay, Duration::from_millis(50));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_yaml_file_rejects_zero_workers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: 0").unwrap();

        let err = ControllerConfig::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig { .. }));
    }

    #[test]
    fn test_missing_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = ControllerConfig::from_yaml_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig { .. }));
    }

    #[test]
    fn test_relative_data_directory_rejected() {
        let config = ControllerConfig {
            data_directory: "data".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
