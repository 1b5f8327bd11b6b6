//! Best-effort teardown of a NetCap deployment

use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::api::ClusterApi;
use super::catalog::{ResourceDescriptor, ResourceKind};
use super::deployment::DeploymentManager;
use crate::error::AppError;

/// An object the teardown pass could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftoverResource(pub String);

impl fmt::Display for LeftoverResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the wait for namespace termination ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceWaitOutcome {
    Deleted,
    TimedOut,
    /// The user interrupted the wait; not a deletion failure
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub leftovers: Vec<LeftoverResource>,
    /// Only set when a namespace deletion was issued successfully
    pub namespace_wait: Option<NamespaceWaitOutcome>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.leftovers.is_empty()
    }
}

/// Cancel `cancel` when the process receives Ctrl-C
pub fn watch_for_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        info!("Interrupt received, skipping the wait");
                        cancel.cancel();
                    }
                    Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
                }
            }
            _ = cancel.cancelled() => {}
        }
    })
}

fn handle_deletion_error(
    err: &AppError,
    resource: &ResourceDescriptor,
    leftovers: &mut Vec<LeftoverResource>,
) {
    debug!(resource = %resource, error = %err, "Error removing resource");
    leftovers.push(LeftoverResource(resource.to_string()));
}

impl<C: ClusterApi> DeploymentManager<C> {
    /// Delete every NetCap object, collecting the ones that couldn't be removed.
    ///
    /// Never stops early. After a successful cluster-wide namespace deletion
    /// it waits up to `wait_timeout` for the namespace to terminate; cancelling
    /// `cancel` (or pressing Ctrl-C) ends that wait without counting as a failure.
    #[instrument(skip(self, cancel), fields(mode = %self.catalog().mode(), namespace = %self.catalog().namespace()))]
    pub async fn delete_all(
        &self,
        cancel: CancellationToken,
        wait_timeout: Duration,
    ) -> TeardownReport {
        info!("Removing NetCap resources");

        let mut report = TeardownReport::default();
        let mut namespace_deleted = false;

        for resource in self.catalog().teardown() {
            match self.api().delete(&resource).await {
                Ok(()) => {
                    if resource.kind == ResourceKind::Namespace {
                        namespace_deleted = true;
                    }
                }
                Err(e) => handle_deletion_error(&e, &resource, &mut report.leftovers),
            }
        }

        if namespace_deleted {
            report.namespace_wait = Some(self.wait_for_namespace(cancel, wait_timeout).await);
        }

        if !report.is_complete() {
            let listing: String = report
                .leftovers
                .iter()
                .map(|r| format!("\n- {}", r))
                .collect();
            error!("Failed to remove the following resources:{}", listing);
        }

        report
    }

    async fn wait_for_namespace(
        &self,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> NamespaceWaitOutcome {
        let namespace = self.catalog().namespace();
        let watcher = watch_for_interrupt(cancel.clone());

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => NamespaceWaitOutcome::Cancelled,
            result = self.api().wait_until_namespace_deleted(namespace, timeout) => match result {
                Ok(()) => NamespaceWaitOutcome::Deleted,
                Err(e) if e.is_timeout() => NamespaceWaitOutcome::TimedOut,
                Err(e) => NamespaceWaitOutcome::Failed(e.to_string()),
            },
        };
        watcher.abort();

        match &outcome {
            NamespaceWaitOutcome::Deleted => info!(namespace, "Namespace deleted"),
            NamespaceWaitOutcome::Cancelled => debug!("Do nothing. User interrupted the wait"),
            NamespaceWaitOutcome::TimedOut => {
                error!("Timeout while removing Namespace {}", namespace)
            }
            NamespaceWaitOutcome::Failed(e) => error!(
                "Error while waiting for Namespace {} to be deleted: {}",
                namespace, e
            ),
        }

        outcome
    }
}
