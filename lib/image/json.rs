//! The OCI/Docker image configuration JSON: the document a manifest's `config` descriptor
//! points at.
//!
//! Grounded on `moby_distribution.spec.image_json`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container healthcheck definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// The healthcheck command, e.g. `["CMD", "curl", "-f", "http://localhost/"]`.
    pub test: Vec<String>,
    /// Nanoseconds between checks.
    pub interval: i64,
    /// Nanoseconds before a check is considered hung.
    pub timeout: i64,
    /// Nanoseconds to wait before the retry countdown starts.
    #[serde(rename = "startPeriod")]
    pub start_period: i64,
    /// Consecutive failures before the container is considered unhealthy.
    pub retries: i64,
}

/// Runtime configuration baked into the image: the default command, environment, and other
/// `docker run` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// The user (and optionally `user:group`) commands run as.
    #[serde(default, rename = "User")]
    pub user: String,
    /// Memory limit in bytes.
    #[serde(default, rename = "Memory", skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// Exposed ports, keyed by `"<port>/<proto>"`.
    #[serde(default, rename = "ExposedPorts", skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<HashMap<String, serde_json::Value>>,
    /// Environment variables, as `"KEY=value"` strings.
    #[serde(default, rename = "Env", skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// The entrypoint argv.
    #[serde(default, rename = "Entrypoint", skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Default arguments appended to the entrypoint.
    #[serde(default, rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// Mount points declared by the image.
    #[serde(default, rename = "Volumes", skip_serializing_if = "Option::is_none")]
    pub volumes: Option<HashMap<String, serde_json::Value>>,
    /// The default working directory.
    #[serde(default, rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Image labels.
    #[serde(default, rename = "Labels", skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// The signal sent to stop the container.
    #[serde(default, rename = "StopSignal", skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    /// The container's healthcheck, if any.
    #[serde(default, rename = "Healthcheck", skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthConfig>,
}

/// Describes the layered root filesystem: the ordered list of uncompressed layer digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Uncompressed (diff id) digests, base layer first.
    pub diff_ids: Vec<String>,
    /// Always `"layers"`.
    #[serde(default = "default_rootfs_type")]
    #[serde(rename = "type")]
    pub fs_type: String,
}

fn default_rootfs_type() -> String {
    "layers".to_string()
}

/// One entry in the image's build history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// When this layer was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Who created this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// The command that produced this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// A free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Whether this history entry corresponds to an empty (metadata-only) layer.
    #[serde(default)]
    pub empty_layer: bool,
}

/// The image configuration document: what a manifest's `config` descriptor points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJson {
    /// When the image was created.
    pub created: DateTime<Utc>,
    /// Who built the image.
    #[serde(default = "default_author")]
    pub author: String,
    /// Target CPU architecture, e.g. `"amd64"`.
    pub architecture: String,
    /// Target OS, e.g. `"linux"`.
    pub os: String,
    /// CPU architecture variant, if any (e.g. `"v7"` for arm).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Default container runtime configuration.
    pub config: ContainerConfig,
    /// The layered root filesystem description.
    pub rootfs: RootFs,
    /// Per-layer build history, parallel to `rootfs.diff_ids`.
    pub history: Vec<History>,
}

fn default_author() -> String {
    "anonymous".to_string()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_json() {
        let json = ImageJson {
            created: "2024-01-01T00:00:00Z".parse().unwrap(),
            author: "anonymous".to_string(),
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            variant: None,
            config: ContainerConfig::default(),
            rootfs: RootFs {
                diff_ids: vec!["sha256:abc".to_string()],
                fs_type: "layers".to_string(),
            },
            history: vec![],
        };
        let bytes = serde_json::to_vec(&json).unwrap();
        let parsed: ImageJson = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json);
    }

    #[test]
    fn test_rootfs_type_defaults_to_layers() {
        let rootfs: RootFs = serde_json::from_str(r#"{"diff_ids": ["sha256:abc"]}"#).unwrap();
        assert_eq!(rootfs.fs_type, "layers");
    }
}
