//! Deployment manager for NetCap
//!
//! Creates the full object set in dependency order. Teardown lives in
//! `cleanup.rs` on the same manager.

use strum::Display;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::api::ClusterApi;
use super::catalog::{DeploymentMode, ResourceCatalog};
use super::resources::{
    build_cluster_role, build_cluster_role_binding, build_config_map, build_front_pod,
    build_hub_pod, build_namespace, build_role, build_role_binding, build_service,
    build_service_account, HubOptions, CONTAINER_PORT, IDENTITY_RESOLUTION_RESOURCES,
};
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Creation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeployStep {
    #[strum(serialize = "namespace")]
    Namespace,
    #[strum(serialize = "config map")]
    ConfigMap,
    #[strum(serialize = "RBAC resources")]
    Rbac,
    #[strum(serialize = "hub pod")]
    HubPod,
    #[strum(serialize = "front pod")]
    FrontPod,
    #[strum(serialize = "hub service")]
    HubService,
    #[strum(serialize = "front service")]
    FrontService,
}

/// A creation pass stopped at `step`
#[derive(Debug, Error)]
#[error("failed to create {step}: {source}")]
pub struct DeployFailure {
    pub step: DeployStep,
    /// Whether RBAC objects were in place when the failure happened
    pub rbac_ready: bool,
    #[source]
    pub source: AppError,
}

fn failed(step: DeployStep, rbac_ready: bool) -> impl FnOnce(AppError) -> DeployFailure {
    move |source| DeployFailure {
        step,
        rbac_ready,
        source,
    }
}

/// Manages the NetCap object set for one mode and namespace
pub struct DeploymentManager<C> {
    api: C,
    catalog: ResourceCatalog,
}

impl<C: ClusterApi> DeploymentManager<C> {
    pub fn new(api: C, catalog: ResourceCatalog) -> Self {
        Self { api, catalog }
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub(crate) fn api(&self) -> &C {
        &self.api
    }

    /// Create every NetCap object.
    ///
    /// Returns whether the RBAC objects were created. `Ok(false)` is a
    /// degraded success: pods run under the default service account and
    /// can't resolve IPs to workload names.
    #[instrument(skip(self, config), fields(mode = %self.catalog.mode(), namespace = %self.catalog.namespace()))]
    pub async fn create_all(&self, config: &Config) -> Result<bool, DeployFailure> {
        let namespace = self.catalog.namespace();
        let names = self.catalog.names();

        if self.catalog.mode() == DeploymentMode::ClusterWide {
            self.api
                .create_namespace(build_namespace(namespace))
                .await
                .map_err(failed(DeployStep::Namespace, false))?;
        }

        let serialized_config = config
            .serialize_for_cluster()
            .map_err(failed(DeployStep::ConfigMap, false))?;
        self.api
            .create_config_map(
                namespace,
                build_config_map(&names.config_map, namespace, &serialized_config),
            )
            .await
            .map_err(failed(DeployStep::ConfigMap, false))?;

        let rbac_ready = match self.create_rbac().await {
            Ok(()) => true,
            Err(e) if config.require_rbac => return Err(failed(DeployStep::Rbac, false)(e)),
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to ensure the resources required for IP resolving. NetCap will not resolve target IPs to names"
                );
                false
            }
        };

        let hub_opts = HubOptions {
            namespace: namespace.to_string(),
            pod_name: names.hub_pod.clone(),
            pod_image: config.hub_image.clone(),
            service_account_name: rbac_ready.then(|| names.service_account.clone()),
            config_map_name: names.config_map.clone(),
            is_namespace_restricted: self.catalog.mode() == DeploymentMode::NamespaceRestricted,
            max_entries_db_size_bytes: config.max_entries_db_size_bytes,
            resources: config.hub_resources.clone(),
            image_pull_policy: config.image_pull_policy.clone(),
            log_level: config.log_level.clone(),
            profiler: config.profiler,
        };
        let front_opts = HubOptions {
            pod_name: names.front_pod.clone(),
            pod_image: config.front_image.clone(),
            ..hub_opts.clone()
        };

        self.api
            .create_pod(namespace, build_hub_pod(&hub_opts))
            .await
            .map_err(failed(DeployStep::HubPod, rbac_ready))?;
        info!(pod = %hub_opts.pod_name, "Successfully created pod");

        self.api
            .create_pod(namespace, build_front_pod(&front_opts, &names.hub_service))
            .await
            .map_err(failed(DeployStep::FrontPod, rbac_ready))?;
        info!(pod = %front_opts.pod_name, "Successfully created pod");

        self.api
            .create_service(
                namespace,
                build_service(
                    &names.hub_service,
                    namespace,
                    &names.hub_pod,
                    CONTAINER_PORT,
                    i32::from(config.hub.dst_port),
                    i32::from(config.hub.src_port),
                ),
            )
            .await
            .map_err(failed(DeployStep::HubService, rbac_ready))?;
        info!(service = %names.hub_service, "Successfully created service");

        self.api
            .create_service(
                namespace,
                build_service(
                    &names.front_service,
                    namespace,
                    &names.front_pod,
                    CONTAINER_PORT,
                    i32::from(config.front.dst_port),
                    i32::from(config.front.src_port),
                ),
            )
            .await
            .map_err(failed(DeployStep::FrontService, rbac_ready))?;
        info!(service = %names.front_service, "Successfully created service");

        Ok(rbac_ready)
    }

    /// Service account plus the mode's role and binding
    async fn create_rbac(&self) -> AppResult<()> {
        let namespace = self.catalog.namespace();
        let names = self.catalog.names();

        self.api
            .create_service_account(
                namespace,
                build_service_account(&names.service_account, namespace),
            )
            .await?;

        match self.catalog.mode() {
            DeploymentMode::ClusterWide => {
                self.api
                    .create_cluster_role(build_cluster_role(
                        &names.cluster_role,
                        &IDENTITY_RESOLUTION_RESOURCES,
                    ))
                    .await?;
                self.api
                    .create_cluster_role_binding(build_cluster_role_binding(
                        &names.cluster_role_binding,
                        &names.cluster_role,
                        &names.service_account,
                        namespace,
                    ))
                    .await?;
            }
            DeploymentMode::NamespaceRestricted => {
                self.api
                    .create_role(
                        namespace,
                        build_role(&names.role, namespace, &IDENTITY_RESOLUTION_RESOURCES),
                    )
                    .await?;
                self.api
                    .create_role_binding(
                        namespace,
                        build_role_binding(
                            &names.role_binding,
                            namespace,
                            &names.role,
                            &names.service_account,
                        ),
                    )
                    .await?;
            }
        }

        Ok(())
    }
}
