//! Kubernetes integration module for NetCap
//!
//! This module handles all interactions with the cluster:
//! - Naming and shaping every object a deployment owns
//! - Creating the object set and tearing it down again
//! - Self-authorization and existence queries used by the checks
//! - Temporary proxy and port-forward tunnels to the hub

mod api;
mod catalog;
mod cleanup;
mod client;
mod deployment;
pub mod resources;
mod tunnel;

pub use api::{ClusterApi, PermissionRule};
pub use catalog::{DeploymentMode, ResourceCatalog, ResourceDescriptor, ResourceKind, ResourceNames};
pub use cleanup::{watch_for_interrupt, LeftoverResource, NamespaceWaitOutcome, TeardownReport};
pub use client::K8sClient;
pub use deployment::{DeployFailure, DeployStep, DeploymentManager};
pub use tunnel::{
    proxy_router, service_proxy_path, KubeTunnelOpener, PodTarget, PortForward, ServiceProxy,
    ServiceTarget, Tunnel, TunnelOpener,
};

#[cfg(test)]
pub use api::MockClusterApi;
#[cfg(test)]
pub use tunnel::{MockTunnel, MockTunnelOpener};
