//! Post-deployment existence audit

use super::CheckOutcome;
use crate::k8s::resources::is_pod_running;
use crate::k8s::{ClusterApi, ResourceCatalog, ResourceDescriptor};

async fn check_exists<C: ClusterApi>(api: &C, resource: &ResourceDescriptor) -> CheckOutcome {
    let noun = resource.kind.noun();
    let subject = resource.to_string();
    match api.exists(resource).await {
        Ok(true) => CheckOutcome::pass(subject, format!("'{}' {} exists", resource.name, noun)),
        Ok(false) => CheckOutcome::fail(
            subject,
            format!("'{}' {} doesn't exist", resource.name, noun),
        ),
        Err(e) => CheckOutcome::fail(
            subject,
            format!(
                "error checking if '{}' {} exists, err: {}",
                resource.name, noun, e
            ),
        ),
    }
}

async fn check_hub_pod<C: ClusterApi>(api: &C, namespace: &str, hub: &str) -> CheckOutcome {
    match api.list_pods_by_app_label(namespace, hub).await {
        Err(e) => CheckOutcome::fail(
            hub,
            format!("error checking if '{}' pod is running, err: {}", hub, e),
        ),
        Ok(pods) => match pods.first() {
            None => CheckOutcome::fail(hub, format!("'{}' pod doesn't exist", hub)),
            Some(pod) if !is_pod_running(pod) => {
                CheckOutcome::fail(hub, format!("'{}' pod not running", hub))
            }
            Some(_) => CheckOutcome::pass(hub, format!("'{}' pod running", hub)),
        },
    }
}

async fn check_worker_pods<C: ClusterApi>(api: &C, namespace: &str, worker: &str) -> CheckOutcome {
    match api.list_pods_by_app_label(namespace, worker).await {
        Err(e) => CheckOutcome::fail(
            worker,
            format!("error checking if '{}' pods are running, err: {}", worker, e),
        ),
        Ok(pods) => {
            let total = pods.len();
            let not_running = pods.iter().filter(|p| !is_pod_running(p)).count();
            if not_running > 0 {
                CheckOutcome::fail(
                    worker,
                    format!(
                        "'{}' {}/{} pods are not running",
                        worker, not_running, total
                    ),
                )
            } else {
                CheckOutcome::pass(worker, format!("'{}' {} pods running", worker, total))
            }
        }
    }
}

/// Audit every object a deployment should own. All checks always run.
pub async fn check_kubernetes_resources<C: ClusterApi>(
    api: &C,
    catalog: &ResourceCatalog,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::new();

    for resource in catalog.audited() {
        outcomes.push(check_exists(api, &resource).await);
    }

    let names = catalog.names();
    outcomes.push(check_hub_pod(api, catalog.namespace(), &names.hub_pod).await);
    outcomes.push(check_worker_pods(api, catalog.namespace(), &names.worker_pod).await);

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::all_passed;
    use crate::error::AppError;
    use crate::k8s::{DeploymentMode, MockClusterApi, ResourceKind, ResourceNames};
    use k8s_openapi::api::core::v1::{Pod, PodStatus};

    fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn catalog(mode: DeploymentMode) -> ResourceCatalog {
        ResourceCatalog::new(mode, "netcap", ResourceNames::default())
    }

    #[tokio::test]
    async fn test_healthy_deployment_passes() {
        let mut api = MockClusterApi::new();
        api.expect_exists().times(6).returning(|_| Ok(true));
        api.expect_list_pods_by_app_label()
            .returning(|_, _| Ok(vec![pod("Running"), pod("Running")]));

        let outcomes = check_kubernetes_resources(&api, &catalog(DeploymentMode::ClusterWide)).await;

        assert_eq!(outcomes.len(), 8);
        assert!(all_passed(&outcomes));
        assert_eq!(outcomes[1].detail, "'netcap-config' config map exists");
        assert_eq!(outcomes[7].detail, "'netcap-worker' 2 pods running");
    }

    #[tokio::test]
    async fn test_worker_counts_are_reported() {
        let mut api = MockClusterApi::new();
        api.expect_exists().returning(|_| Ok(true));
        api.expect_list_pods_by_app_label()
            .withf(|_, app| app == "netcap-hub")
            .returning(|_, _| Ok(vec![pod("Running")]));
        api.expect_list_pods_by_app_label()
            .withf(|_, app| app == "netcap-worker")
            .returning(|_, _| {
                Ok(vec![
                    pod("Running"),
                    pod("Pending"),
                    pod("Running"),
                    pod("CrashLoopBackOff"),
                    pod("Running"),
                ])
            });

        let outcomes =
            check_kubernetes_resources(&api, &catalog(DeploymentMode::NamespaceRestricted)).await;
        let workers = outcomes.last().unwrap();

        assert!(!workers.passed);
        assert_eq!(workers.detail, "'netcap-worker' 2/5 pods are not running");
    }

    #[tokio::test]
    async fn test_missing_hub_pod_is_not_confused_with_stopped() {
        let mut api = MockClusterApi::new();
        api.expect_exists().returning(|_| Ok(true));
        api.expect_list_pods_by_app_label()
            .withf(|_, app| app == "netcap-hub")
            .returning(|_, _| Ok(vec![]));
        api.expect_list_pods_by_app_label()
            .withf(|_, app| app == "netcap-worker")
            .returning(|_, _| Ok(vec![]));

        let outcomes = check_kubernetes_resources(&api, &catalog(DeploymentMode::ClusterWide)).await;
        let hub = &outcomes[outcomes.len() - 2];

        assert!(!hub.passed);
        assert_eq!(hub.detail, "'netcap-hub' pod doesn't exist");
        // the worker check still ran
        assert!(outcomes.last().unwrap().passed);
    }

    #[tokio::test]
    async fn test_pending_hub_pod_is_not_running() {
        let mut api = MockClusterApi::new();
        api.expect_exists().returning(|_| Ok(true));
        api.expect_list_pods_by_app_label()
            .returning(|_, _| Ok(vec![pod("Pending")]));

        let outcomes = check_kubernetes_resources(&api, &catalog(DeploymentMode::ClusterWide)).await;

        assert_eq!(outcomes[outcomes.len() - 2].detail, "'netcap-hub' pod not running");
    }

    #[tokio::test]
    async fn test_missing_and_erroring_objects_do_not_stop_the_audit() {
        let mut api = MockClusterApi::new();
        api.expect_exists().times(6).returning(|resource| match resource.kind {
            ResourceKind::ServiceAccount => Ok(false),
            ResourceKind::RoleBinding => Err(AppError::internal("forbidden")),
            _ => Ok(true),
        });
        api.expect_list_pods_by_app_label()
            .returning(|_, _| Ok(vec![pod("Running")]));

        let outcomes =
            check_kubernetes_resources(&api, &catalog(DeploymentMode::NamespaceRestricted)).await;

        assert_eq!(outcomes.len(), 8);
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.passed).collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(
            failed[0].detail,
            "'netcap-service-account' service account doesn't exist"
        );
        assert_eq!(
            failed[1].detail,
            "error checking if 'netcap-role-binding' role binding exists, err: Internal error: forbidden"
        );
    }

    #[tokio::test]
    async fn test_audit_checks_only_mode_rbac() {
        let mut api = MockClusterApi::new();
        api.expect_exists()
            .withf(|r| !matches!(r.kind, ResourceKind::Role | ResourceKind::RoleBinding))
            .returning(|_| Ok(true));
        api.expect_list_pods_by_app_label()
            .returning(|_, _| Ok(vec![pod("Running")]));

        let outcomes = check_kubernetes_resources(&api, &catalog(DeploymentMode::ClusterWide)).await;

        assert!(all_passed(&outcomes));
    }
}
