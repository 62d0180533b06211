//! Configuration module for Drainsafe
//!
//! Handles loading and validating configuration from YAML files and environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use drainsafe_core::gate::NODE_KIND;
use drainsafe_core::metadata::DEFAULT_ENDPOINT;
use drainsafe_k8s::DrainConfig;

/// Scheduled event detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Interval between scheduled event evaluations
    #[serde(with = "humantime_serde", default = "default_detector_interval")]
    pub interval: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval: default_detector_interval(),
        }
    }
}

/// Instance metadata service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URL of the metadata service
    #[serde(default = "default_metadata_endpoint")]
    pub endpoint: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde", default = "default_metadata_timeout")]
    pub timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metadata_endpoint(),
            timeout: default_metadata_timeout(),
        }
    }
}

/// External approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Ask the repairman API before touching a node
    #[serde(default)]
    pub enabled: bool,

    /// Resource kind recorded on maintenance requests
    #[serde(default = "default_gate_kind")]
    pub kind: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: default_gate_kind(),
        }
    }
}

/// Pod eviction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainSettings {
    /// Pods evicted at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between eviction attempts blocked by a disruption budget
    #[serde(with = "humantime_serde", default = "default_eviction_retry")]
    pub eviction_retry: Duration,

    /// Extra time beyond the grace period before a drain is abandoned
    #[serde(with = "humantime_serde", default = "default_timeout_slack")]
    pub timeout_slack: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            eviction_retry: default_eviction_retry(),
            timeout_slack: default_timeout_slack(),
        }
    }
}

impl DrainSettings {
    pub fn to_drain_config(&self) -> DrainConfig {
        DrainConfig {
            concurrency: self.concurrency,
            eviction_retry: self.eviction_retry,
            deletion_check: self.eviction_retry,
            timeout_slack: self.timeout_slack,
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port to expose metrics on
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node name (from K8s downward API)
    #[serde(default)]
    pub node_name: Option<String>,

    /// Pod name (from K8s downward API), used in event messages and ownership
    #[serde(default)]
    pub pod_name: Option<String>,

    /// Detector configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Metadata service configuration
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Approval gate configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Drain configuration
    #[serde(default)]
    pub drain: DrainSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Dry run mode - log actions but don't execute
    #[serde(default)]
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.detector.interval.is_zero() {
            anyhow::bail!("detector.interval must be > 0");
        }
        if self.metadata.timeout.is_zero() {
            anyhow::bail!("metadata.timeout must be > 0");
        }
        if !self.metadata.endpoint.starts_with("http://")
            && !self.metadata.endpoint.starts_with("https://")
        {
            anyhow::bail!("metadata.endpoint must be an http(s) URL");
        }
        if self.gate.enabled && self.gate.kind.trim().is_empty() {
            anyhow::bail!("gate.kind must be set when the gate is enabled");
        }
        if self.drain.concurrency == 0 {
            anyhow::bail!("drain.concurrency must be > 0");
        }
        if self.drain.eviction_retry.is_zero() {
            anyhow::bail!("drain.eviction_retry must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be > 0 when metrics are enabled");
        }
        Ok(())
    }

    /// Fill node and pod names from the environment where not set
    pub fn with_identity_from_env(mut self) -> Self {
        if self.node_name.is_none() {
            self.node_name = std::env::var("NODE_NAME").ok();
        }
        if self.pod_name.is_none() {
            self.pod_name = std::env::var("POD_NAME").ok();
        }
        self
    }

    /// Pod name, required by both roles
    pub fn require_pod_name(&self) -> Result<String> {
        self.pod_name
            .clone()
            .filter(|n| !n.is_empty())
            .context("Pod name must be specified via config, --pod-name, or POD_NAME env")
    }

    /// Node name, required by the agent
    pub fn require_node_name(&self) -> Result<String> {
        self.node_name
            .clone()
            .filter(|n| !n.is_empty())
            .context("Node name must be specified via config, --node-name, or NODE_NAME env")
    }
}

// Default value functions
fn default_detector_interval() -> Duration {
    Duration::from_secs(25)
}

fn default_metadata_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_gate_kind() -> String {
    NODE_KIND.to_string()
}

fn default_concurrency() -> usize {
    5
}

fn default_eviction_retry() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout_slack() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.interval, Duration::from_secs(25));
        assert_eq!(config.metadata.endpoint, "http://169.254.169.254/metadata");
        assert!(!config.gate.enabled);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
detector:
  interval: 30s

metadata:
  endpoint: http://127.0.0.1:8080/metadata
  timeout: 3s

gate:
  enabled: true
  kind: node

drain:
  concurrency: 10
  eviction_retry: 2s
  timeout_slack: 1m

metrics:
  enabled: true
  port: 9100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.detector.interval, Duration::from_secs(30));
        assert_eq!(config.metadata.timeout, Duration::from_secs(3));
        assert!(config.gate.enabled);
        assert_eq!(config.drain.concurrency, 10);
        assert_eq!(config.drain.to_drain_config().timeout_slack, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.drain.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metadata.endpoint = "169.254.169.254".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gate.enabled = true;
        config.gate.kind = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_required() {
        let config = Config {
            pod_name: Some("drainsafe-x7k2p".to_string()),
            ..Config::default()
        };
        assert_eq!(config.require_pod_name().unwrap(), "drainsafe-x7k2p");
        assert!(config.require_node_name().is_err());
    }
}
