//! Kubernetes object builders for a NetCap deployment
//!
//! Pure functions turning names and options into k8s-openapi objects

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, Namespace, Pod, PodSpec,
    ResourceRequirements, Service, ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::config::ResourceLimits;

/// Version stamped on RBAC objects
pub const RBAC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resources the hub needs to resolve captured IPs to workload names
pub const IDENTITY_RESOLUTION_RESOURCES: [&str; 3] = ["pods", "services", "endpoints"];

/// Port every NetCap container listens on
pub const CONTAINER_PORT: i32 = 80;

/// Key holding the serialized deployment config inside the ConfigMap
pub const CONFIG_MAP_KEY: &str = "netcap-config.json";

const CONFIG_MOUNT_PATH: &str = "/app/config/";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Labels shared by every object we create
pub fn managed_labels() -> BTreeMap<String, String> {
    [(
        "app.kubernetes.io/managed-by".to_string(),
        "netcap".to_string(),
    )]
    .into_iter()
    .collect()
}

/// Managed labels plus the `app` label pods are selected by
pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert("app".to_string(), app.to_string());
    labels
}

fn rbac_labels() -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert("netcap-cli-version".to_string(), RBAC_VERSION.to_string());
    labels
}

fn meta(name: &str, namespace: Option<&str>, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        ..Default::default()
    }
}

pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(name, None, managed_labels()),
        ..Default::default()
    }
}

pub fn build_config_map(name: &str, namespace: &str, serialized_config: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(name, Some(namespace), managed_labels()),
        data: Some(
            [(CONFIG_MAP_KEY.to_string(), serialized_config.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn build_service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(name, Some(namespace), rbac_labels()),
        ..Default::default()
    }
}

fn read_only_rules(resources: &[&str]) -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec![
            String::new(),
            "extensions".to_string(),
            "apps".to_string(),
        ]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: vec!["list".to_string(), "get".to_string(), "watch".to_string()],
        ..Default::default()
    }]
}

pub fn build_cluster_role(name: &str, resources: &[&str]) -> ClusterRole {
    ClusterRole {
        metadata: meta(name, None, rbac_labels()),
        rules: Some(read_only_rules(resources)),
        ..Default::default()
    }
}

pub fn build_role(name: &str, namespace: &str, resources: &[&str]) -> Role {
    Role {
        metadata: meta(name, Some(namespace), rbac_labels()),
        rules: Some(read_only_rules(resources)),
    }
}

fn service_account_subject(service_account: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn build_cluster_role_binding(
    name: &str,
    cluster_role: &str,
    service_account: &str,
    namespace: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: meta(name, None, rbac_labels()),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    }
}

pub fn build_role_binding(
    name: &str,
    namespace: &str,
    role: &str,
    service_account: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: meta(name, Some(namespace), rbac_labels()),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    }
}

/// Shared settings for the hub and front pods
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub namespace: String,
    pub pod_name: String,
    pub pod_image: String,
    /// `None` runs the pod under the namespace's default service account
    pub service_account_name: Option<String>,
    pub config_map_name: String,
    pub is_namespace_restricted: bool,
    pub max_entries_db_size_bytes: i64,
    pub resources: ResourceLimits,
    pub image_pull_policy: String,
    pub log_level: String,
    pub profiler: bool,
}

fn build_resource_requirements(limits: &ResourceLimits) -> ResourceRequirements {
    let limit_map = [
        ("cpu".to_string(), Quantity(limits.cpu_limit.clone())),
        ("memory".to_string(), Quantity(limits.memory_limit.clone())),
    ]
    .into_iter()
    .collect();
    let request_map = [
        ("cpu".to_string(), Quantity(limits.cpu_requests.clone())),
        ("memory".to_string(), Quantity(limits.memory_requests.clone())),
    ]
    .into_iter()
    .collect();

    ResourceRequirements {
        limits: Some(limit_map),
        requests: Some(request_map),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn build_pod(opts: &HubOptions, env_vars: Vec<EnvVar>) -> Pod {
    let config_volume = "netcap-config-volume";

    Pod {
        metadata: meta(
            &opts.pod_name,
            Some(&opts.namespace),
            app_labels(&opts.pod_name),
        ),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: opts.pod_name.clone(),
                image: Some(opts.pod_image.clone()),
                image_pull_policy: Some(opts.image_pull_policy.clone()),
                env: Some(env_vars),
                resources: Some(build_resource_requirements(&opts.resources)),
                ports: Some(vec![ContainerPort {
                    container_port: CONTAINER_PORT,
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![VolumeMount {
                    name: config_volume.to_string(),
                    mount_path: CONFIG_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: config_volume.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(opts.config_map_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            service_account_name: opts.service_account_name.clone(),
            restart_policy: Some("Always".to_string()),
            dns_policy: Some("ClusterFirstWithHostNet".to_string()),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Control-plane pod aggregating worker traffic
pub fn build_hub_pod(opts: &HubOptions) -> Pod {
    build_pod(
        opts,
        vec![
            env("LOG_LEVEL", opts.log_level.clone()),
            env("PROFILING_ENABLED", opts.profiler.to_string()),
            env(
                "NAMESPACE_RESTRICTED",
                opts.is_namespace_restricted.to_string(),
            ),
            env(
                "MAX_ENTRIES_DB_BYTES",
                opts.max_entries_db_size_bytes.to_string(),
            ),
            env("NETCAP_NAMESPACE", opts.namespace.clone()),
        ],
    )
}

/// UI pod talking to the hub service
pub fn build_front_pod(opts: &HubOptions, hub_service: &str) -> Pod {
    build_pod(
        opts,
        vec![
            env("LOG_LEVEL", opts.log_level.clone()),
            env(
                "HUB_URL",
                format!("http://{}.{}.svc", hub_service, opts.namespace),
            ),
        ],
    )
}

/// NodePort service exposing `port` in the cluster and `node_port` on every
/// node, routing both to the app's container port
pub fn build_service(
    name: &str,
    namespace: &str,
    app: &str,
    target_port: i32,
    port: i32,
    node_port: i32,
) -> Service {
    Service {
        metadata: meta(name, Some(namespace), managed_labels()),
        spec: Some(ServiceSpec {
            selector: Some([("app".to_string(), app.to_string())].into_iter().collect()),
            ports: Some(vec![ServicePort {
                name: Some(name.to_string()),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                node_port: Some(node_port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("NodePort".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A pod counts as running only in the `Running` phase
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Running")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;

    fn options() -> HubOptions {
        HubOptions {
            namespace: "netcap".to_string(),
            pod_name: "netcap-hub".to_string(),
            pod_image: "netcap/hub:latest".to_string(),
            service_account_name: Some("netcap-service-account".to_string()),
            config_map_name: "netcap-config".to_string(),
            is_namespace_restricted: false,
            max_entries_db_size_bytes: 1024,
            resources: ResourceLimits::default(),
            image_pull_policy: "Always".to_string(),
            log_level: "debug".to_string(),
            profiler: true,
        }
    }

    #[test]
    fn test_hub_pod_carries_options() {
        let pod = build_hub_pod(&options());
        let spec = pod.spec.unwrap();
        let container = &spec.containers[0];

        assert_eq!(pod.metadata.name.as_deref(), Some("netcap-hub"));
        assert_eq!(
            pod.metadata.labels.unwrap().get("app").map(String::as_str),
            Some("netcap-hub")
        );
        assert_eq!(spec.service_account_name.as_deref(), Some("netcap-service-account"));
        assert_eq!(container.image.as_deref(), Some("netcap/hub:latest"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));

        let env = container.env.as_ref().unwrap();
        let profiler = env.iter().find(|e| e.name == "PROFILING_ENABLED").unwrap();
        assert_eq!(profiler.value.as_deref(), Some("true"));

        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["cpu"], Quantity("750m".to_string()));
    }

    #[test]
    fn test_anonymous_service_account() {
        let opts = HubOptions {
            service_account_name: None,
            ..options()
        };
        let pod = build_front_pod(&opts, "netcap-hub");
        assert!(pod.spec.unwrap().service_account_name.is_none());
    }

    #[test]
    fn test_service_maps_ports() {
        let svc = build_service("netcap-hub", "netcap", "netcap-hub", CONTAINER_PORT, 8080, 8898);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(port.node_port, Some(8898));
        assert_eq!(port.target_port, Some(IntOrString::Int(80)));
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("netcap-hub")
        );
    }

    #[test]
    fn test_bindings_reference_service_account() {
        let crb = build_cluster_role_binding("crb", "cr", "sa", "netcap");
        assert_eq!(crb.role_ref.kind, "ClusterRole");
        let subject = &crb.subjects.unwrap()[0];
        assert_eq!(subject.name, "sa");
        assert_eq!(subject.namespace.as_deref(), Some("netcap"));

        let rb = build_role_binding("rb", "netcap", "role", "sa");
        assert_eq!(rb.role_ref.kind, "Role");
        assert_eq!(rb.metadata.namespace.as_deref(), Some("netcap"));
    }

    #[test]
    fn test_rbac_rules_cover_requested_resources() {
        let role = build_role("r", "netcap", &IDENTITY_RESOLUTION_RESOURCES);
        let rule = &role.rules.unwrap()[0];
        assert_eq!(
            rule.resources.as_deref().unwrap(),
            &["pods".to_string(), "services".to_string(), "endpoints".to_string()]
        );
        assert_eq!(rule.verbs, vec!["list", "get", "watch"]);
    }

    #[test]
    fn test_is_pod_running() {
        let mut pod = Pod::default();
        assert!(!is_pod_running(&pod));

        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        assert!(!is_pod_running(&pod));

        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });
        assert!(is_pod_running(&pod));
    }
}
