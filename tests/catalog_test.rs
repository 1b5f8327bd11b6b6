//! Tests for the deployment object catalog
//!
//! These tests verify naming and the per-mode object sets.

use netcap_deployer::k8s::{
    DeploymentMode, ResourceCatalog, ResourceDescriptor, ResourceKind, ResourceNames,
};

fn names(set: &[ResourceDescriptor]) -> Vec<String> {
    set.iter().map(|r| r.to_string()).collect()
}

#[test]
fn test_default_naming_scheme() {
    let names = ResourceNames::default();

    assert_eq!(names.config_map, "netcap-config");
    assert_eq!(names.service_account, "netcap-service-account");
    assert_eq!(names.cluster_role, "netcap-cluster-role");
    assert_eq!(names.role_binding, "netcap-role-binding");
    assert_eq!(names.daemon_role, "netcap-role-daemon");
    assert_eq!(names.hub_pod, "netcap-hub");
    assert_eq!(names.hub_service, "netcap-hub");
    assert_eq!(names.front_pod, "netcap-front");
}

#[test]
fn test_custom_prefix() {
    let names = ResourceNames::with_prefix("capture");
    assert_eq!(names.hub_pod, "capture-hub");
    assert_eq!(names.worker_daemon_set, "capture-worker-daemon-set");
}

#[test]
fn test_cluster_wide_audit_set() {
    let catalog =
        ResourceCatalog::new(DeploymentMode::ClusterWide, "netcap", ResourceNames::default());

    assert_eq!(
        names(&catalog.audited()),
        vec![
            "Namespace netcap",
            "ConfigMap netcap-config in namespace netcap",
            "Service Account netcap-service-account in namespace netcap",
            "ClusterRole netcap-cluster-role",
            "ClusterRoleBinding netcap-cluster-role-binding",
            "Service netcap-hub in namespace netcap",
        ]
    );
}

#[test]
fn test_restricted_teardown_covers_every_created_object() {
    let catalog = ResourceCatalog::new(
        DeploymentMode::NamespaceRestricted,
        "team-a",
        ResourceNames::default(),
    );
    let teardown = catalog.teardown();

    assert_eq!(teardown.len(), 13);
    assert!(teardown
        .iter()
        .all(|r| r.namespace.as_deref() == Some("team-a")));
    assert!(teardown
        .iter()
        .all(|r| !r.kind.is_cluster_scoped()));

    let kinds: Vec<ResourceKind> = teardown.iter().map(|r| r.kind).collect();
    for kind in [
        ResourceKind::Service,
        ResourceKind::DaemonSet,
        ResourceKind::ConfigMap,
        ResourceKind::ServiceAccount,
        ResourceKind::Role,
        ResourceKind::RoleBinding,
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::PersistentVolumeClaim,
    ] {
        assert!(kinds.contains(&kind), "missing {}", kind);
    }

    let listed = names(&teardown);
    assert!(listed.contains(&"Pod netcap-front in namespace team-a".to_string()));
    assert!(listed.contains(&"Role netcap-role-daemon in namespace team-a".to_string()));
}

#[test]
fn test_mode_display() {
    assert_eq!(DeploymentMode::ClusterWide.to_string(), "cluster-wide");
    assert_eq!(
        DeploymentMode::NamespaceRestricted.to_string(),
        "namespace-restricted"
    );
}
