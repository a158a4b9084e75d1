use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    cert_key_key_gen, join_command_key_gen, marker_key_gen, retry::RetryPolicy,
};

/// Upper bound for any configured timeout or interval: 30 days.
const MAX_DURATION_SECS: u64 = 30 * 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the coordination store lives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_s3_root")]
        root: String,
    },
    Etcd {
        endpoints: Vec<String>,
    },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreRetry {
    /// Attempts per store call; 0 would mean retry forever and is rejected.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deadline for a single store call.
    pub call_timeout_ms: u64,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            call_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// BootstrapConfig holds the user defined settings for one control plane.
pub struct BootstrapConfig {
    /// Name of the cluster. Namespaces every key in the store.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Autoscaling group the control plane nodes are launched in.
    /// Discovered from the local instance when not set.
    #[serde(default)]
    pub autoscaling_group: Option<String>,
    /// Target group behind the control plane load balancer.
    pub target_group_arn: String,
    /// External DNS name of the control plane load balancer.
    pub load_balancer_dns: String,
    #[serde(default = "default_api_server_port")]
    pub api_server_port: u16,
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    #[serde(default)]
    pub pod_subnet: Option<String>,
    #[serde(default)]
    pub service_subnet: Option<String>,
    pub store: StoreBackend,
    /// Every bootstrap key lives under this prefix.
    #[serde(default = "default_store_prefix")]
    pub store_prefix: String,
    #[serde(default)]
    pub store_retry: StoreRetry,
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_secs: u64,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Time between two credential rotations.
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
    /// TTL handed to kubeadm for every join token.
    #[serde(default = "default_token_ttl")]
    pub token_ttl: String,
    #[serde(default = "default_kubeadm_path")]
    pub kubeadm_path: String,
    #[serde(default = "default_aws_cli_path")]
    pub aws_cli_path: String,
    /// Directory the generated kubeadm configuration is written to.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// If set, the admin kubeconfig is copied to `<home>/.kube/config`.
    #[serde(default)]
    pub kubeconfig_home: Option<PathBuf>,
}

fn default_s3_root() -> String {
    "/".to_owned()
}

fn default_cluster_name() -> String {
    "kubernetes".to_owned()
}

fn default_api_server_port() -> u16 {
    6443
}

fn default_store_prefix() -> String {
    "bootstrap".to_owned()
}

fn default_health_poll_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    600
}

fn default_wait_poll_interval() -> u64 {
    15
}

fn default_wait_timeout() -> u64 {
    1800
}

fn default_rotation_interval() -> u64 {
    86_400
}

fn default_token_ttl() -> String {
    "24h".to_owned()
}

fn default_kubeadm_path() -> String {
    "kubeadm".to_owned()
}

fn default_aws_cli_path() -> String {
    "aws".to_owned()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/etc/kubeboot")
}

impl BootstrapConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: BootstrapConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_balancer_dns.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "load_balancer_dns must not be empty".to_owned(),
            ));
        }
        if self.cluster_name.is_empty() || self.cluster_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "cluster_name {:?} must be non-empty and contain no '/'",
                self.cluster_name
            )));
        }
        let pairs = [
            (
                "health",
                self.health_poll_interval_secs,
                self.health_timeout_secs,
            ),
            ("wait", self.wait_poll_interval_secs, self.wait_timeout_secs),
        ];
        for (name, interval, timeout) in pairs {
            if interval == 0 || timeout == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} poll interval and timeout must be positive"
                )));
            }
            if interval > timeout {
                return Err(ConfigError::Invalid(format!(
                    "{name} poll interval ({interval}s) exceeds its timeout ({timeout}s)"
                )));
            }
        }
        if self.rotation_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "rotation_interval_secs must be positive".to_owned(),
            ));
        }
        let bounded = [
            ("health_timeout_secs", self.health_timeout_secs),
            ("wait_timeout_secs", self.wait_timeout_secs),
            ("rotation_interval_secs", self.rotation_interval_secs),
            ("store_retry.call_timeout_ms", self.store_retry.call_timeout_ms / 1000),
            ("store_retry.max_delay_ms", self.store_retry.max_delay_ms / 1000),
        ];
        for (name, secs) in bounded {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} exceeds {MAX_DURATION_SECS}s"
                )));
            }
        }
        if self.store_retry.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_retry.call_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.store_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store_retry.max_attempts must be bounded".to_owned(),
            ));
        }
        if let StoreBackend::Etcd { endpoints } = &self.store {
            if endpoints.is_empty() {
                return Err(ConfigError::Invalid(
                    "etcd store needs at least one endpoint".to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// The address every node uses to reach the control plane.
    pub fn control_plane_endpoint(&self) -> String {
        format!("{}:{}", self.load_balancer_dns, self.api_server_port)
    }

    pub fn marker_key(&self) -> String {
        marker_key_gen!(self.store_prefix, self.cluster_name)
    }

    pub fn join_command_key(&self) -> String {
        join_command_key_gen!(self.store_prefix, self.cluster_name)
    }

    pub fn cert_key_key(&self) -> String {
        cert_key_key_gen!(self.store_prefix, self.cluster_name)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn store_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retry.max_attempts,
            first_delay: Duration::from_millis(self.store_retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.store_retry.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.store_retry.call_timeout_ms),
        }
    }
}

/// Small, fast configuration shared by unit tests across the crate.
#[cfg(test)]
pub fn test_config() -> BootstrapConfig {
    BootstrapConfig {
        cluster_name: "test".to_owned(),
        region: Some("us-east-1".to_owned()),
        autoscaling_group: Some("cp-asg".to_owned()),
        target_group_arn: "arn:aws:elasticloadbalancing:us-east-1:1:targetgroup/cp/1".to_owned(),
        load_balancer_dns: "cp.example".to_owned(),
        api_server_port: 6443,
        kubernetes_version: None,
        pod_subnet: None,
        service_subnet: None,
        store: StoreBackend::Memory,
        store_prefix: "bootstrap".to_owned(),
        store_retry: StoreRetry {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            call_timeout_ms: 50,
        },
        health_poll_interval_secs: 1,
        health_timeout_secs: 2,
        wait_poll_interval_secs: 1,
        wait_timeout_secs: 2,
        rotation_interval_secs: 1,
        token_ttl: "24h".to_owned(),
        kubeadm_path: "kubeadm".to_owned(),
        aws_cli_path: "aws".to_owned(),
        work_dir: std::env::temp_dir(),
        kubeconfig_home: None,
    }
}
