use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppResult;
use crate::k8s::DeploymentMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub kube_context: Option<String>,

    #[serde(default = "default_resources_namespace")]
    pub resources_namespace: String,

    /// Confine the deployment to `resources_namespace` with namespaced RBAC
    #[serde(default)]
    pub namespace_restricted: bool,

    #[serde(default = "default_hub_port_forward")]
    pub hub: PortForwardConfig,

    #[serde(default = "default_front_port_forward")]
    pub front: PortForwardConfig,

    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,

    #[serde(default = "default_hub_image")]
    pub hub_image: String,

    #[serde(default = "default_front_image")]
    pub front_image: String,

    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub profiler: bool,

    #[serde(default)]
    pub hub_resources: ResourceLimits,

    #[serde(default = "default_max_entries_db_size_bytes")]
    pub max_entries_db_size_bytes: i64,

    /// Abort the deployment when RBAC objects can't be created
    #[serde(default)]
    pub require_rbac: bool,

    #[serde(default = "default_namespace_delete_timeout_secs")]
    pub namespace_delete_timeout_secs: u64,

    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

/// Local (`src_port`) and in-cluster (`dst_port`) ports of a forwarded service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpu_limit: String,
    pub memory_limit: String,
    pub cpu_requests: String,
    pub memory_requests: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_limit: "750m".to_string(),
            memory_limit: "1Gi".to_string(),
            cpu_requests: "50m".to_string(),
            memory_requests: "50Mi".to_string(),
        }
    }
}

fn default_resources_namespace() -> String {
    "netcap".to_string()
}

fn default_hub_port_forward() -> PortForwardConfig {
    PortForwardConfig {
        src_port: 8898,
        dst_port: 80,
    }
}

fn default_front_port_forward() -> PortForwardConfig {
    PortForwardConfig {
        src_port: 8899,
        dst_port: 80,
    }
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_hub_image() -> String {
    "netcap/hub:latest".to_string()
}

fn default_front_image() -> String {
    "netcap/front:latest".to_string()
}

fn default_image_pull_policy() -> String {
    "Always".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_entries_db_size_bytes() -> i64 {
    200 * 1024 * 1024
}

fn default_namespace_delete_timeout_secs() -> u64 {
    120
}

fn default_probe_retries() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    2
}

impl Config {
    /// Load from `.env` and `NETCAP_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `NETCAP_HUB__SRC_PORT=9000`.
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("NETCAP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn mode(&self) -> DeploymentMode {
        if self.namespace_restricted {
            DeploymentMode::NamespaceRestricted
        } else {
            DeploymentMode::ClusterWide
        }
    }

    /// JSON stored in the deployment ConfigMap and read by the hub
    pub fn serialize_for_cluster(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn namespace_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.namespace_delete_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            kube_context: None,
            resources_namespace: default_resources_namespace(),
            namespace_restricted: false,
            hub: default_hub_port_forward(),
            front: default_front_port_forward(),
            proxy_host: default_proxy_host(),
            hub_image: default_hub_image(),
            front_image: default_front_image(),
            image_pull_policy: default_image_pull_policy(),
            log_level: default_log_level(),
            profiler: false,
            hub_resources: ResourceLimits::default(),
            max_entries_db_size_bytes: default_max_entries_db_size_bytes(),
            require_rbac: false,
            namespace_delete_timeout_secs: default_namespace_delete_timeout_secs(),
            probe_retries: default_probe_retries(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}
