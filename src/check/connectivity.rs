//! Hub connectivity
//!
//! Direct first. When no tunnel is already up, try both a temporary proxy and
//! a temporary port-forward so each path gets its own verdict. Any tunnel
//! opened here is closed before the strategy returns.

use regex::Regex;
use std::time::Duration;
use strum::Display;
use tracing::{debug, warn};

use super::connector::Probe;
use super::CheckOutcome;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::k8s::{PodTarget, ResourceNames, ServiceTarget, Tunnel, TunnelOpener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectivityStrategy {
    #[strum(serialize = "direct")]
    Direct,
    #[strum(serialize = "proxy")]
    Proxy,
    #[strum(serialize = "port-forward")]
    PortForward,
}

/// Everything the verifier needs to reach the hub
#[derive(Debug, Clone)]
pub struct ConnectivitySettings {
    pub namespace: String,
    pub hub_service: String,
    pub hub_pod_pattern: Regex,
    pub service_port: u16,
    pub pod_port: u16,
    /// Local port both the pre-existing tunnel and ours listen on
    pub local_port: u16,
    pub retries: u32,
    pub timeout: Duration,
}

impl ConnectivitySettings {
    pub fn from_config(config: &Config, names: &ResourceNames) -> AppResult<Self> {
        let hub_pod_pattern = Regex::new(&regex::escape(&names.hub_pod))
            .map_err(|e| AppError::internal(&format!("Invalid hub pod pattern: {}", e)))?;
        Ok(Self {
            namespace: config.resources_namespace.clone(),
            hub_service: names.hub_service.clone(),
            hub_pod_pattern,
            service_port: config.hub.dst_port,
            pod_port: crate::k8s::resources::CONTAINER_PORT as u16,
            local_port: config.hub.src_port,
            retries: config.probe_retries,
            timeout: config.probe_timeout(),
        })
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}

pub struct ConnectivityVerifier<'a, P, T> {
    probe: &'a P,
    tunnels: &'a T,
    settings: ConnectivitySettings,
}

impl<'a, P: Probe, T: TunnelOpener> ConnectivityVerifier<'a, P, T> {
    pub fn new(probe: &'a P, tunnels: &'a T, settings: ConnectivitySettings) -> Self {
        Self {
            probe,
            tunnels,
            settings,
        }
    }

    /// Returns whether any strategy reached the hub, plus one outcome per
    /// strategy that produced a verdict.
    pub async fn verify(&self) -> (bool, Vec<CheckOutcome>) {
        let url = self.settings.url();

        match self.probe.probe(&url, 1, self.settings.timeout).await {
            Ok(()) => {
                return (
                    true,
                    vec![CheckOutcome::pass(
                        ConnectivityStrategy::Direct.to_string(),
                        "found NetCap hub tunnel available and connected successfully to hub",
                    )],
                );
            }
            Err(e) => debug!(url = %url, error = %e, "No existing tunnel to hub"),
        }

        let proxy = self.through_proxy(&url).await;
        let port_forward = self.through_port_forward(&url).await;

        let outcomes = vec![
            strategy_outcome(ConnectivityStrategy::Proxy, "proxy", proxy),
            strategy_outcome(ConnectivityStrategy::PortForward, "port-forward", port_forward),
        ];
        let connected = outcomes.iter().any(|o| o.passed);
        (connected, outcomes)
    }

    async fn through_proxy(&self, url: &str) -> AppResult<()> {
        let target = ServiceTarget {
            namespace: self.settings.namespace.clone(),
            service: self.settings.hub_service.clone(),
            port: self.settings.service_port,
        };
        let tunnel = self
            .tunnels
            .open_proxy(&target, self.settings.local_port)
            .await?;
        self.probe_through(tunnel, url, ConnectivityStrategy::Proxy)
            .await
    }

    async fn through_port_forward(&self, url: &str) -> AppResult<()> {
        let target = PodTarget {
            namespace: self.settings.namespace.clone(),
            name_pattern: self.settings.hub_pod_pattern.clone(),
            port: self.settings.pod_port,
        };
        let tunnel = self
            .tunnels
            .open_port_forward(&target, self.settings.local_port)
            .await?;
        self.probe_through(tunnel, url, ConnectivityStrategy::PortForward)
            .await
    }

    /// Probe with retries, then close `tunnel` regardless of the result
    async fn probe_through(
        &self,
        mut tunnel: Box<dyn Tunnel>,
        url: &str,
        strategy: ConnectivityStrategy,
    ) -> AppResult<()> {
        let result = self
            .probe
            .probe(url, self.settings.retries, self.settings.timeout)
            .await;

        if let Err(e) = tunnel.close().await {
            warn!(%strategy, error = %e, "Error occurred while stopping tunnel");
        }

        result
    }
}

fn strategy_outcome(
    strategy: ConnectivityStrategy,
    label: &str,
    result: AppResult<()>,
) -> CheckOutcome {
    match result {
        Ok(()) => CheckOutcome::pass(
            strategy.to_string(),
            format!("connected successfully to hub using {}", label),
        ),
        Err(e) => CheckOutcome::fail(
            strategy.to_string(),
            format!("couldn't connect to hub using {}, err: {}", label, e),
        ),
    }
}
