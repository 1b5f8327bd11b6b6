//! Cluster primitives the deployment logic is written against
//!
//! `K8sClient` is the production implementation. Tests script the trait
//! with mockall.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use std::fmt;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use super::catalog::ResourceDescriptor;
use crate::error::AppResult;

/// One (group, resource, verb) triple to ask the API server about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    /// Empty string is the core group
    pub group: String,
    /// May carry a subresource, e.g. `pods/portforward`
    pub resource: String,
    pub verb: String,
    /// `None` asks about the whole cluster
    pub namespace: Option<String>,
}

impl PermissionRule {
    /// Split `pods/portforward` into (`pods`, Some(`portforward`))
    pub fn resource_and_subresource(&self) -> (&str, Option<&str>) {
        match self.resource.split_once('/') {
            Some((resource, sub)) => (resource, Some(sub)),
            None => (self.resource.as_str(), None),
        }
    }

    /// "in api group 'apps' and namespace 'netcap'" or a shorter variant
    pub fn scope_description(&self) -> String {
        let namespace = self.namespace.as_deref().unwrap_or("");
        match (self.group.is_empty(), namespace.is_empty()) {
            (false, false) => format!(
                "in api group '{}' and namespace '{}'",
                self.group, namespace
            ),
            (false, true) => format!("in api group '{}'", self.group),
            (true, false) => format!("in namespace '{}'", namespace),
            (true, true) => String::new(),
        }
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.scope_description();
        if scope.is_empty() {
            write!(f, "{} {}", self.verb, self.resource)
        } else {
            write!(f, "{} {} {}", self.verb, self.resource, scope)
        }
    }
}

/// Trait abstracting the Kubernetes calls made by the lifecycle and check code
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Git version reported by the API server
    async fn server_version(&self) -> AppResult<String>;

    async fn create_namespace(&self, namespace: Namespace) -> AppResult<()>;

    async fn create_config_map(&self, namespace: &str, config_map: ConfigMap) -> AppResult<()>;

    async fn create_service_account(
        &self,
        namespace: &str,
        account: ServiceAccount,
    ) -> AppResult<()>;

    async fn create_cluster_role(&self, role: ClusterRole) -> AppResult<()>;

    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> AppResult<()>;

    async fn create_role(&self, namespace: &str, role: Role) -> AppResult<()>;

    async fn create_role_binding(&self, namespace: &str, binding: RoleBinding) -> AppResult<()>;

    async fn create_pod(&self, namespace: &str, pod: Pod) -> AppResult<()>;

    async fn create_service(&self, namespace: &str, service: Service) -> AppResult<()>;

    async fn delete(&self, resource: &ResourceDescriptor) -> AppResult<()>;

    async fn exists(&self, resource: &ResourceDescriptor) -> AppResult<bool>;

    async fn list_pods_by_app_label(&self, namespace: &str, app: &str) -> AppResult<Vec<Pod>>;

    /// Self-authorization query for the acting identity
    async fn can_i(&self, rule: &PermissionRule) -> AppResult<bool>;

    /// Resolve once the namespace is gone; `AppError::Timeout` after `timeout`
    async fn wait_until_namespace_deleted(&self, name: &str, timeout: Duration) -> AppResult<()>;
}
