//! Permission pre-flight
//!
//! A bundled Role or ClusterRole document lists what the acting identity
//! needs. Each rule expands to groups × resources × verbs and every triple is
//! asked about with a self-authorization query.

use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, Role};

use super::CheckOutcome;
use crate::error::{AppError, AppResult};
use crate::k8s::{ClusterApi, DeploymentMode, PermissionRule};

const NAMESPACE_RESTRICTED_POLICY: &str =
    include_str!("../../permissions/permissions-ns-restricted.yaml");
const CLUSTER_WIDE_POLICY: &str = include_str!("../../permissions/permissions-cluster-wide.yaml");

/// A decoded policy document
#[derive(Debug, Clone)]
pub enum PermissionPolicy {
    /// From a Role; checked inside `namespace`
    Namespaced {
        rules: Vec<PolicyRule>,
        namespace: String,
    },
    /// From a ClusterRole; checked cluster-wide
    ClusterScoped { rules: Vec<PolicyRule> },
}

impl PermissionPolicy {
    /// The document bundled for `mode`
    pub fn bundled(mode: DeploymentMode, namespace: &str) -> AppResult<Self> {
        let document = match mode {
            DeploymentMode::NamespaceRestricted => NAMESPACE_RESTRICTED_POLICY,
            DeploymentMode::ClusterWide => CLUSTER_WIDE_POLICY,
        };
        Self::from_yaml(document, namespace)
    }

    /// Decode a single Role or ClusterRole; any other kind is rejected
    pub fn from_yaml(document: &str, namespace: &str) -> AppResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(document)?;
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "Role" => {
                let role: Role = serde_yaml::from_value(value)?;
                Ok(PermissionPolicy::Namespaced {
                    rules: role.rules.unwrap_or_default(),
                    namespace: namespace.to_string(),
                })
            }
            "ClusterRole" => {
                let role: ClusterRole = serde_yaml::from_value(value)?;
                Ok(PermissionPolicy::ClusterScoped {
                    rules: role.rules.unwrap_or_default(),
                })
            }
            other => Err(AppError::policy(&format!(
                "resource of type 'Role' or 'ClusterRole' not found, got '{}'",
                other
            ))),
        }
    }

    fn rules(&self) -> &[PolicyRule] {
        match self {
            PermissionPolicy::Namespaced { rules, .. } => rules,
            PermissionPolicy::ClusterScoped { rules } => rules,
        }
    }

    fn namespace(&self) -> Option<&str> {
        match self {
            PermissionPolicy::Namespaced { namespace, .. } => Some(namespace),
            PermissionPolicy::ClusterScoped { .. } => None,
        }
    }

    /// Every (group, resource, verb) triple in declaration order
    pub fn expand(&self) -> Vec<PermissionRule> {
        let namespace = self.namespace().map(str::to_string);
        let mut expanded = Vec::new();

        for rule in self.rules() {
            let groups = rule.api_groups.as_deref().unwrap_or_default();
            let resources = rule.resources.as_deref().unwrap_or_default();
            for group in groups {
                for resource in resources {
                    for verb in &rule.verbs {
                        expanded.push(PermissionRule {
                            group: group.clone(),
                            resource: resource.clone(),
                            verb: verb.clone(),
                            namespace: namespace.clone(),
                        });
                    }
                }
            }
        }

        expanded
    }
}

/// Query every expanded triple; one outcome per query, no short-circuit
pub async fn check_permissions<C: ClusterApi>(
    api: &C,
    policy: &PermissionPolicy,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::new();

    for rule in policy.expand() {
        let outcome = match api.can_i(&rule).await {
            Ok(true) => CheckOutcome::pass(rule.to_string(), format!("can {}", rule)),
            Ok(false) => CheckOutcome::fail(rule.to_string(), format!("can't {}", rule)),
            Err(e) => CheckOutcome::fail(
                rule.to_string(),
                format!("error checking permission for {}, err: {}", rule, e),
            ),
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// Load the bundled policy for `mode` and check it
pub async fn check_kubernetes_permissions<C: ClusterApi>(
    api: &C,
    mode: DeploymentMode,
    namespace: &str,
) -> Vec<CheckOutcome> {
    match PermissionPolicy::bundled(mode, namespace) {
        Ok(policy) => check_permissions(api, &policy).await,
        Err(e) => vec![CheckOutcome::fail(
            "policy",
            format!("error while checking kubernetes permissions, err: {}", e),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::all_passed;
    use crate::k8s::MockClusterApi;

    const SMALL_ROLE: &str = r#"
kind: Role
apiVersion: rbac.authorization.k8s.io/v1
metadata:
  name: test
rules:
  - apiGroups: [""]
    resources: ["pods", "services"]
    verbs: ["get", "list"]
"#;

    #[test]
    fn test_role_decodes_as_namespaced() {
        let policy = PermissionPolicy::from_yaml(SMALL_ROLE, "capture").unwrap();
        assert!(matches!(
            policy,
            PermissionPolicy::Namespaced { ref namespace, .. } if namespace == "capture"
        ));

        let rules = policy.expand();
        assert_eq!(rules.len(), 4);
        assert!(rules
            .iter()
            .all(|r| r.namespace.as_deref() == Some("capture") && r.group.is_empty()));
        assert_eq!(rules[0].to_string(), "get pods in namespace 'capture'");
    }

    #[test]
    fn test_unexpected_kind_is_policy_error() {
        let doc = "kind: ConfigMap\napiVersion: v1\nmetadata:\n  name: x\n";
        let err = PermissionPolicy::from_yaml(doc, "netcap").unwrap_err();
        assert!(matches!(err, AppError::Policy(_)));
    }

    #[test]
    fn test_bundled_policies_match_mode() {
        let restricted =
            PermissionPolicy::bundled(DeploymentMode::NamespaceRestricted, "netcap").unwrap();
        assert!(matches!(restricted, PermissionPolicy::Namespaced { .. }));

        let cluster = PermissionPolicy::bundled(DeploymentMode::ClusterWide, "netcap").unwrap();
        assert!(matches!(cluster, PermissionPolicy::ClusterScoped { .. }));
        assert!(cluster.expand().iter().all(|r| r.namespace.is_none()));
    }

    #[tokio::test]
    async fn test_one_denial_fails_but_every_triple_is_checked() {
        let policy = PermissionPolicy::from_yaml(SMALL_ROLE, "netcap").unwrap();

        let mut api = MockClusterApi::new();
        api.expect_can_i()
            .times(4)
            .returning(|rule| Ok(!(rule.resource == "services" && rule.verb == "list")));

        let outcomes = check_permissions(&api, &policy).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.iter().filter(|o| o.passed).count(), 3);
        assert!(!all_passed(&outcomes));
        assert!(outcomes
            .iter()
            .any(|o| o.detail == "can't list services in namespace 'netcap'"));
    }

    #[tokio::test]
    async fn test_query_error_counts_as_failure() {
        let policy = PermissionPolicy::from_yaml(SMALL_ROLE, "netcap").unwrap();

        let mut api = MockClusterApi::new();
        api.expect_can_i().times(4).returning(|rule| {
            if rule.verb == "get" && rule.resource == "pods" {
                Err(AppError::internal("connection reset"))
            } else {
                Ok(true)
            }
        });

        let outcomes = check_permissions(&api, &policy).await;

        assert!(!all_passed(&outcomes));
        assert_eq!(
            outcomes[0].detail,
            "error checking permission for get pods in namespace 'netcap', err: Internal error: connection reset"
        );
    }

    #[tokio::test]
    async fn test_bundled_policy_issues_one_query_per_triple() {
        let expected =
            PermissionPolicy::bundled(DeploymentMode::ClusterWide, "netcap").unwrap().expand().len();

        let mut api = MockClusterApi::new();
        api.expect_can_i().times(expected).returning(|_| Ok(true));

        let outcomes =
            check_kubernetes_permissions(&api, DeploymentMode::ClusterWide, "netcap").await;

        assert_eq!(outcomes.len(), expected);
        assert!(all_passed(&outcomes));
    }
}
