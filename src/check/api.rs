//! Kubernetes API reachability

use std::future::Future;

use super::CheckOutcome;
use crate::error::AppResult;
use crate::k8s::ClusterApi;

/// Build a client with `connect` and ask the server for its version.
///
/// The client is handed back only when both steps succeed, so later checks
/// can be skipped when the cluster is unreachable.
pub async fn check_kubernetes_api<C, F>(connect: F) -> (Option<C>, Vec<CheckOutcome>)
where
    C: ClusterApi,
    F: Future<Output = AppResult<C>>,
{
    let mut outcomes = Vec::new();

    let client = match connect.await {
        Ok(client) => {
            outcomes.push(CheckOutcome::pass("client", "can initialize the client"));
            client
        }
        Err(e) => {
            outcomes.push(CheckOutcome::fail(
                "client",
                format!("can't initialize the client, err: {}", e),
            ));
            return (None, outcomes);
        }
    };

    match client.server_version().await {
        Ok(version) => {
            outcomes.push(CheckOutcome::pass(
                "api",
                format!("can query the Kubernetes API (server {})", version),
            ));
            (Some(client), outcomes)
        }
        Err(e) => {
            outcomes.push(CheckOutcome::fail(
                "api",
                format!("can't query the Kubernetes API, err: {}", e),
            ));
            (None, outcomes)
        }
    }
}
