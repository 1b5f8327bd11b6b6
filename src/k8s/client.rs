//! Kubernetes client wrapper for NetCap

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    runtime::wait::{await_condition, conditions},
    Client, Config, Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::api::{ClusterApi, PermissionRule};
use super::catalog::{ResourceDescriptor, ResourceKind};
use crate::error::{AppError, AppResult};

/// Wrapper around kube::Client implementing [`ClusterApi`]
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Build a client from an explicit kubeconfig/context, or infer one
    #[instrument(skip_all)]
    pub async fn new(kubeconfig: Option<&str>, context: Option<&str>) -> AppResult<Self> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };

        let config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    AppError::internal(&format!("Failed to read kubeconfig {}: {}", path, e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| AppError::internal(&format!("Invalid kubeconfig: {}", e)))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| AppError::internal(&format!("Invalid kubeconfig: {}", e)))?,
            (None, None) => Config::infer().await.map_err(|e| {
                AppError::internal(&format!("Failed to infer Kubernetes config: {}", e))
            })?,
        };

        let client = Client::try_from(config)?;
        info!("Kubernetes client initialized");

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

fn require_namespace(resource: &ResourceDescriptor) -> AppResult<&str> {
    resource.namespace.as_deref().ok_or_else(|| {
        AppError::internal(&format!("{} is namespaced but has no namespace", resource))
    })
}

async fn create_object<K>(api: Api<K>, object: &K) -> AppResult<()>
where
    K: Resource + Clone + DeserializeOwned + serde::Serialize + Debug,
{
    api.create(&PostParams::default(), object).await?;
    Ok(())
}

async fn delete_object<K>(api: Api<K>, name: &str) -> AppResult<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

async fn object_exists<K>(api: Api<K>, name: &str) -> AppResult<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?.is_some())
}

#[async_trait]
impl ClusterApi for K8sClient {
    async fn server_version(&self) -> AppResult<String> {
        let version = self.client.apiserver_version().await?;
        debug!(version = %version.git_version, "Queried Kubernetes version");
        Ok(version.git_version)
    }

    #[instrument(skip(self, namespace), fields(namespace = %namespace.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_namespace(&self, namespace: Namespace) -> AppResult<()> {
        create_object(self.cluster::<Namespace>(), &namespace).await?;
        info!("Created namespace");
        Ok(())
    }

    #[instrument(skip(self, config_map), fields(config_map = %config_map.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_config_map(&self, namespace: &str, config_map: ConfigMap) -> AppResult<()> {
        create_object(self.namespaced::<ConfigMap>(namespace), &config_map).await?;
        info!("Created config map");
        Ok(())
    }

    #[instrument(skip(self, account), fields(service_account = %account.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service_account(
        &self,
        namespace: &str,
        account: ServiceAccount,
    ) -> AppResult<()> {
        create_object(self.namespaced::<ServiceAccount>(namespace), &account).await?;
        info!("Created service account");
        Ok(())
    }

    #[instrument(skip(self, role), fields(cluster_role = %role.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_cluster_role(&self, role: ClusterRole) -> AppResult<()> {
        create_object(self.cluster::<ClusterRole>(), &role).await?;
        info!("Created cluster role");
        Ok(())
    }

    #[instrument(skip(self, binding), fields(cluster_role_binding = %binding.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> AppResult<()> {
        create_object(self.cluster::<ClusterRoleBinding>(), &binding).await?;
        info!("Created cluster role binding");
        Ok(())
    }

    #[instrument(skip(self, role), fields(role = %role.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_role(&self, namespace: &str, role: Role) -> AppResult<()> {
        create_object(self.namespaced::<Role>(namespace), &role).await?;
        info!("Created role");
        Ok(())
    }

    #[instrument(skip(self, binding), fields(role_binding = %binding.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_role_binding(&self, namespace: &str, binding: RoleBinding) -> AppResult<()> {
        create_object(self.namespaced::<RoleBinding>(namespace), &binding).await?;
        info!("Created role binding");
        Ok(())
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, namespace: &str, pod: Pod) -> AppResult<()> {
        create_object(self.namespaced::<Pod>(namespace), &pod).await?;
        info!("Created pod");
        Ok(())
    }

    #[instrument(skip(self, service), fields(service_name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, namespace: &str, service: Service) -> AppResult<()> {
        create_object(self.namespaced::<Service>(namespace), &service).await?;
        info!("Created service");
        Ok(())
    }

    #[instrument(skip(self, resource), fields(resource = %resource))]
    async fn delete(&self, resource: &ResourceDescriptor) -> AppResult<()> {
        let name = resource.name.as_str();
        match resource.kind {
            ResourceKind::Namespace => delete_object(self.cluster::<Namespace>(), name).await?,
            ResourceKind::ClusterRole => delete_object(self.cluster::<ClusterRole>(), name).await?,
            ResourceKind::ClusterRoleBinding => {
                delete_object(self.cluster::<ClusterRoleBinding>(), name).await?
            }
            ResourceKind::ConfigMap => {
                delete_object(self.namespaced::<ConfigMap>(require_namespace(resource)?), name)
                    .await?
            }
            ResourceKind::ServiceAccount => {
                delete_object(
                    self.namespaced::<ServiceAccount>(require_namespace(resource)?),
                    name,
                )
                .await?
            }
            ResourceKind::Role => {
                delete_object(self.namespaced::<Role>(require_namespace(resource)?), name).await?
            }
            ResourceKind::RoleBinding => {
                delete_object(self.namespaced::<RoleBinding>(require_namespace(resource)?), name)
                    .await?
            }
            ResourceKind::Pod => {
                delete_object(self.namespaced::<Pod>(require_namespace(resource)?), name).await?
            }
            ResourceKind::Service => {
                delete_object(self.namespaced::<Service>(require_namespace(resource)?), name)
                    .await?
            }
            ResourceKind::DaemonSet => {
                delete_object(self.namespaced::<DaemonSet>(require_namespace(resource)?), name)
                    .await?
            }
            ResourceKind::Deployment => {
                delete_object(self.namespaced::<Deployment>(require_namespace(resource)?), name)
                    .await?
            }
            ResourceKind::PersistentVolumeClaim => {
                delete_object(
                    self.namespaced::<PersistentVolumeClaim>(require_namespace(resource)?),
                    name,
                )
                .await?
            }
        }
        info!("Deleted resource");
        Ok(())
    }

    async fn exists(&self, resource: &ResourceDescriptor) -> AppResult<bool> {
        let name = resource.name.as_str();
        match resource.kind {
            ResourceKind::Namespace => object_exists(self.cluster::<Namespace>(), name).await,
            ResourceKind::ClusterRole => object_exists(self.cluster::<ClusterRole>(), name).await,
            ResourceKind::ClusterRoleBinding => {
                object_exists(self.cluster::<ClusterRoleBinding>(), name).await
            }
            ResourceKind::ConfigMap => {
                object_exists(self.namespaced::<ConfigMap>(require_namespace(resource)?), name)
                    .await
            }
            ResourceKind::ServiceAccount => {
                object_exists(
                    self.namespaced::<ServiceAccount>(require_namespace(resource)?),
                    name,
                )
                .await
            }
            ResourceKind::Role => {
                object_exists(self.namespaced::<Role>(require_namespace(resource)?), name).await
            }
            ResourceKind::RoleBinding => {
                object_exists(self.namespaced::<RoleBinding>(require_namespace(resource)?), name)
                    .await
            }
            ResourceKind::Pod => {
                object_exists(self.namespaced::<Pod>(require_namespace(resource)?), name).await
            }
            ResourceKind::Service => {
                object_exists(self.namespaced::<Service>(require_namespace(resource)?), name).await
            }
            ResourceKind::DaemonSet => {
                object_exists(self.namespaced::<DaemonSet>(require_namespace(resource)?), name)
                    .await
            }
            ResourceKind::Deployment => {
                object_exists(self.namespaced::<Deployment>(require_namespace(resource)?), name)
                    .await
            }
            ResourceKind::PersistentVolumeClaim => {
                object_exists(
                    self.namespaced::<PersistentVolumeClaim>(require_namespace(resource)?),
                    name,
                )
                .await
            }
        }
    }

    async fn list_pods_by_app_label(&self, namespace: &str, app: &str) -> AppResult<Vec<Pod>> {
        let pods = self.namespaced::<Pod>(namespace);
        let list = pods
            .list(&ListParams::default().labels(&format!("app={}", app)))
            .await?;
        Ok(list.items)
    }

    async fn can_i(&self, rule: &PermissionRule) -> AppResult<bool> {
        let (resource, subresource) = rule.resource_and_subresource();

        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(rule.group.clone()),
                    resource: Some(resource.to_string()),
                    subresource: subresource.map(str::to_string),
                    verb: Some(rule.verb.clone()),
                    namespace: rule.namespace.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let reviews = self.cluster::<SelfSubjectAccessReview>();
        let response = reviews.create(&PostParams::default(), &review).await?;

        Ok(response.status.map(|s| s.allowed).unwrap_or(false))
    }

    #[instrument(skip(self))]
    async fn wait_until_namespace_deleted(&self, name: &str, timeout: Duration) -> AppResult<()> {
        let namespaces = self.cluster::<Namespace>();

        let deleted = async {
            let uid = match namespaces.get_opt(name).await? {
                Some(ns) => ns.metadata.uid.unwrap_or_default(),
                None => return Ok(()),
            };
            await_condition(namespaces.clone(), name, conditions::is_deleted(&uid))
                .await
                .map(|_| ())
                .map_err(|e| {
                    AppError::internal(&format!("Watching namespace {} failed: {}", name, e))
                })
        };

        match tokio::time::timeout(timeout, deleted).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(&format!(
                "namespace {} still exists after {:?}",
                name, timeout
            ))),
        }
    }
}
