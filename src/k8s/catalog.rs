//! Names and shapes of every object a NetCap deployment may own
//!
//! Nothing here talks to the cluster. The catalog is derived once per
//! operation from the deployment mode and handed to the components that
//! create, audit or delete objects.

use std::fmt;
use strum::Display;

/// How far the deployment reaches into the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeploymentMode {
    /// Dedicated namespace plus ClusterRole/ClusterRoleBinding
    #[strum(serialize = "cluster-wide")]
    ClusterWide,
    /// Pre-existing namespace plus Role/RoleBinding
    #[strum(serialize = "namespace-restricted")]
    NamespaceRestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    #[strum(serialize = "Service Account")]
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    Pod,
    Service,
    DaemonSet,
    Deployment,
    PersistentVolumeClaim,
}

impl ResourceKind {
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::Namespace | ResourceKind::ClusterRole | ResourceKind::ClusterRoleBinding
        )
    }

    /// Lower-case noun used in check messages ("config map", "role binding")
    pub fn noun(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::ConfigMap => "config map",
            ResourceKind::ServiceAccount => "service account",
            ResourceKind::Role => "role",
            ResourceKind::RoleBinding => "role binding",
            ResourceKind::ClusterRole => "cluster role",
            ResourceKind::ClusterRoleBinding => "cluster role binding",
            ResourceKind::Pod => "pod",
            ResourceKind::Service => "service",
            ResourceKind::DaemonSet => "daemon set",
            ResourceKind::Deployment => "deployment",
            ResourceKind::PersistentVolumeClaim => "persistent volume claim",
        }
    }
}

/// One object the deployment may own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ResourceDescriptor {
    pub fn namespaced(kind: ResourceKind, name: &str, namespace: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: None,
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {} in namespace {}", self.kind, self.name, ns),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Fixed naming scheme for deployment objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub config_map: String,
    pub service_account: String,
    pub cluster_role: String,
    pub cluster_role_binding: String,
    pub role: String,
    pub role_binding: String,
    pub daemon_role: String,
    pub daemon_role_binding: String,
    pub hub_pod: String,
    pub hub_service: String,
    pub front_pod: String,
    pub front_service: String,
    pub worker_pod: String,
    pub worker_daemon_set: String,
    pub persistent_volume_claim: String,
}

impl ResourceNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            config_map: format!("{prefix}-config"),
            service_account: format!("{prefix}-service-account"),
            cluster_role: format!("{prefix}-cluster-role"),
            cluster_role_binding: format!("{prefix}-cluster-role-binding"),
            role: format!("{prefix}-role"),
            role_binding: format!("{prefix}-role-binding"),
            daemon_role: format!("{prefix}-role-daemon"),
            daemon_role_binding: format!("{prefix}-role-binding-daemon"),
            hub_pod: format!("{prefix}-hub"),
            hub_service: format!("{prefix}-hub"),
            front_pod: format!("{prefix}-front"),
            front_service: format!("{prefix}-front"),
            worker_pod: format!("{prefix}-worker"),
            worker_daemon_set: format!("{prefix}-worker-daemon-set"),
            persistent_volume_claim: format!("{prefix}-persistent-volume-claim"),
        }
    }
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self::with_prefix("netcap")
    }
}

/// The active object set for one mode and namespace
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    mode: DeploymentMode,
    namespace: String,
    names: ResourceNames,
}

impl ResourceCatalog {
    pub fn new(mode: DeploymentMode, namespace: &str, names: ResourceNames) -> Self {
        Self {
            mode,
            namespace: namespace.to_string(),
            names,
        }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    fn ns(&self, kind: ResourceKind, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::namespaced(kind, name, &self.namespace)
    }

    pub fn namespace_object(&self) -> ResourceDescriptor {
        ResourceDescriptor::cluster(ResourceKind::Namespace, &self.namespace)
    }

    /// Role + binding, or ClusterRole + binding, never both
    pub fn rbac(&self) -> Vec<ResourceDescriptor> {
        match self.mode {
            DeploymentMode::NamespaceRestricted => vec![
                self.ns(ResourceKind::Role, &self.names.role),
                self.ns(ResourceKind::RoleBinding, &self.names.role_binding),
            ],
            DeploymentMode::ClusterWide => vec![
                ResourceDescriptor::cluster(ResourceKind::ClusterRole, &self.names.cluster_role),
                ResourceDescriptor::cluster(
                    ResourceKind::ClusterRoleBinding,
                    &self.names.cluster_role_binding,
                ),
            ],
        }
    }

    /// Objects whose presence is audited after a deployment
    pub fn audited(&self) -> Vec<ResourceDescriptor> {
        let mut resources = vec![
            self.namespace_object(),
            self.ns(ResourceKind::ConfigMap, &self.names.config_map),
            self.ns(ResourceKind::ServiceAccount, &self.names.service_account),
        ];
        resources.extend(self.rbac());
        resources.push(self.ns(ResourceKind::Service, &self.names.hub_service));
        resources
    }

    /// Objects removed by a teardown pass.
    ///
    /// Cluster-wide teardown relies on namespace deletion cascading to
    /// everything namespaced.
    pub fn teardown(&self) -> Vec<ResourceDescriptor> {
        match self.mode {
            DeploymentMode::ClusterWide => {
                let mut resources = vec![self.namespace_object()];
                resources.extend(self.rbac());
                resources
            }
            DeploymentMode::NamespaceRestricted => vec![
                self.ns(ResourceKind::Service, &self.names.hub_service),
                self.ns(ResourceKind::Service, &self.names.front_service),
                self.ns(ResourceKind::DaemonSet, &self.names.worker_daemon_set),
                self.ns(ResourceKind::ConfigMap, &self.names.config_map),
                self.ns(ResourceKind::ServiceAccount, &self.names.service_account),
                self.ns(ResourceKind::Role, &self.names.role),
                self.ns(ResourceKind::Pod, &self.names.hub_pod),
                self.ns(ResourceKind::Pod, &self.names.front_pod),
                self.ns(ResourceKind::RoleBinding, &self.names.role_binding),
                self.ns(ResourceKind::Deployment, &self.names.hub_pod),
                self.ns(
                    ResourceKind::PersistentVolumeClaim,
                    &self.names.persistent_volume_claim,
                ),
                self.ns(ResourceKind::Role, &self.names.daemon_role),
                self.ns(ResourceKind::RoleBinding, &self.names.daemon_role_binding),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(resources: &[ResourceDescriptor]) -> Vec<ResourceKind> {
        resources.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_restricted_mode_never_references_cluster_rbac() {
        let catalog = ResourceCatalog::new(
            DeploymentMode::NamespaceRestricted,
            "capture",
            ResourceNames::default(),
        );
        for set in [catalog.rbac(), catalog.audited(), catalog.teardown()] {
            let kinds = kinds(&set);
            assert!(!kinds.contains(&ResourceKind::ClusterRole));
            assert!(!kinds.contains(&ResourceKind::ClusterRoleBinding));
        }
    }

    #[test]
    fn test_cluster_wide_mode_never_references_namespaced_rbac() {
        let catalog =
            ResourceCatalog::new(DeploymentMode::ClusterWide, "netcap", ResourceNames::default());
        for set in [catalog.rbac(), catalog.audited(), catalog.teardown()] {
            let kinds = kinds(&set);
            assert!(!kinds.contains(&ResourceKind::Role));
            assert!(!kinds.contains(&ResourceKind::RoleBinding));
        }
    }

    #[test]
    fn test_cluster_wide_teardown_is_namespace_and_cluster_rbac() {
        let catalog =
            ResourceCatalog::new(DeploymentMode::ClusterWide, "netcap", ResourceNames::default());
        assert_eq!(
            kinds(&catalog.teardown()),
            vec![
                ResourceKind::Namespace,
                ResourceKind::ClusterRole,
                ResourceKind::ClusterRoleBinding
            ]
        );
    }

    #[test]
    fn test_descriptor_display() {
        let pod = ResourceDescriptor::namespaced(ResourceKind::Pod, "netcap-hub", "netcap");
        assert_eq!(pod.to_string(), "Pod netcap-hub in namespace netcap");

        let role = ResourceDescriptor::cluster(ResourceKind::ClusterRole, "netcap-cluster-role");
        assert_eq!(role.to_string(), "ClusterRole netcap-cluster-role");

        let sa =
            ResourceDescriptor::namespaced(ResourceKind::ServiceAccount, "netcap-sa", "netcap");
        assert_eq!(sa.to_string(), "Service Account netcap-sa in namespace netcap");
    }

    #[test]
    fn test_scope() {
        assert!(ResourceKind::Namespace.is_cluster_scoped());
        assert!(ResourceKind::ClusterRoleBinding.is_cluster_scoped());
        assert!(!ResourceKind::Role.is_cluster_scoped());
    }
}
