//! Pre-flight and post-deployment checks
//!
//! Every check builds [`CheckOutcome`] values and never logs on its own;
//! [`report::log_outcomes`] renders them.

pub mod api;
pub mod connectivity;
pub mod connector;
pub mod permissions;
pub mod report;
pub mod resources;

pub use api::check_kubernetes_api;
pub use connectivity::{ConnectivitySettings, ConnectivityStrategy, ConnectivityVerifier};
pub use connector::{HttpConnector, Probe};
pub use permissions::{check_kubernetes_permissions, check_permissions, PermissionPolicy};
pub use report::log_outcomes;
pub use resources::check_kubernetes_resources;

/// Result of checking one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub subject: String,
    pub passed: bool,
    /// Operator-facing message
    pub detail: String,
}

impl CheckOutcome {
    pub fn pass(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Logical AND over every outcome; an empty list passes
pub fn all_passed(outcomes: &[CheckOutcome]) -> bool {
    outcomes.iter().all(|o| o.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_passed() {
        assert!(all_passed(&[]));
        assert!(all_passed(&[CheckOutcome::pass("a", "ok")]));
        assert!(!all_passed(&[
            CheckOutcome::pass("a", "ok"),
            CheckOutcome::fail("b", "missing"),
        ]));
    }
}
