//! Short-lived local tunnels into the cluster
//!
//! Two flavours are provided:
//! - a reverse proxy that forwards local HTTP requests through the API
//!   server's service-proxy subresource
//! - a port-forward that bridges a local TCP listener to a pod port over the
//!   API server's websocket port-forward
//!
//! Both bind a local listener immediately and run on a background task until
//! [`Tunnel::close`] is called.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use regex::Regex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::{AppError, AppResult};

/// A local endpoint that must be released once the caller is done with it
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Tunnel: Send {
    /// Address the tunnel is listening on
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting traffic. Calling it more than once is a no-op.
    async fn close(&mut self) -> AppResult<()>;
}

/// Where the service-proxy tunnel sends requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub namespace: String,
    pub service: String,
    pub port: u16,
}

/// Which pod a port-forward should reach
#[derive(Debug, Clone)]
pub struct PodTarget {
    pub namespace: String,
    /// Matched against pod names; the first match wins
    pub name_pattern: Regex,
    pub port: u16,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    async fn open_proxy(&self, target: &ServiceTarget, local_port: u16)
        -> AppResult<Box<dyn Tunnel>>;

    async fn open_port_forward(
        &self,
        target: &PodTarget,
        local_port: u16,
    ) -> AppResult<Box<dyn Tunnel>>;
}

/// Opens tunnels with a live kube client
#[derive(Clone)]
pub struct KubeTunnelOpener {
    client: Client,
    host: String,
}

impl KubeTunnelOpener {
    pub fn new(client: Client, host: &str) -> Self {
        Self {
            client,
            host: host.to_string(),
        }
    }

    async fn bind(&self, port: u16) -> AppResult<TcpListener> {
        let listener = TcpListener::bind((self.host.as_str(), port))
            .await
            .map_err(|e| {
                AppError::internal(&format!(
                    "Failed to bind {}:{}: {}",
                    self.host, port, e
                ))
            })?;
        Ok(listener)
    }
}

#[async_trait]
impl TunnelOpener for KubeTunnelOpener {
    #[instrument(skip(self), fields(service = %target.service, namespace = %target.namespace))]
    async fn open_proxy(
        &self,
        target: &ServiceTarget,
        local_port: u16,
    ) -> AppResult<Box<dyn Tunnel>> {
        let listener = self.bind(local_port).await?;
        let tunnel = ServiceProxy::start(self.client.clone(), target.clone(), listener)?;
        info!(addr = %tunnel.local_addr(), "Proxy started");
        Ok(Box::new(tunnel))
    }

    #[instrument(skip(self), fields(pattern = %target.name_pattern, namespace = %target.namespace))]
    async fn open_port_forward(
        &self,
        target: &PodTarget,
        local_port: u16,
    ) -> AppResult<Box<dyn Tunnel>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let pod_name = find_pod_by_pattern(&pods, &target.name_pattern).await?;

        let listener = self.bind(local_port).await?;
        let tunnel = PortForward::start(pods, pod_name, target.port, listener)?;
        info!(addr = %tunnel.local_addr(), "Port-forward started");
        Ok(Box::new(tunnel))
    }
}

async fn find_pod_by_pattern(pods: &Api<Pod>, pattern: &Regex) -> AppResult<String> {
    let list = pods.list(&ListParams::default()).await?;
    list.items
        .into_iter()
        .filter_map(|pod| pod.metadata.name)
        .find(|name| pattern.is_match(name))
        .ok_or_else(|| AppError::not_found(&format!("No pod matching '{}'", pattern)))
}

/// Path through the API server to a service port
pub fn service_proxy_path(target: &ServiceTarget, path_and_query: &str) -> String {
    let suffix = if path_and_query.starts_with('/') {
        path_and_query.to_string()
    } else {
        format!("/{}", path_and_query)
    };
    format!(
        "/api/v1/namespaces/{}/services/{}:{}/proxy{}",
        target.namespace, target.service, target.port, suffix
    )
}

struct ProxyState {
    client: Client,
    target: ServiceTarget,
}

/// Forward one request through the API server.
///
/// Only answers produced by the hub are passed on. When the API server can't
/// be reached, or its service proxy reports that the hub is unavailable, the
/// caller gets a gateway error rather than anything resembling a hub reply.
async fn forward(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
) -> (StatusCode, String) {
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let path = service_proxy_path(&state.target, path_and_query);
    debug!(%method, %path, "Forwarding request");

    let request = match http::Request::builder()
        .method(method.as_str())
        .uri(path.as_str())
        .body(Vec::new())
    {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.client.request_text(request).await {
        Ok(body) => (StatusCode::OK, body),
        Err(kube::Error::Api(response)) => {
            let status = StatusCode::from_u16(response.code)
                .ok()
                .filter(|status| !is_gateway_error(*status))
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, response.message)
        }
        Err(e) => {
            warn!(error = %e, %path, "API server unreachable");
            (StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

fn is_gateway_error(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Router answering every path by forwarding it to `target`
pub fn proxy_router(client: Client, target: ServiceTarget) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(Arc::new(ProxyState { client, target }))
        .layer(TraceLayer::new_for_http())
}

/// Local HTTP server forwarding every request to one service
pub struct ServiceProxy {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl ServiceProxy {
    pub fn start(client: Client, target: ServiceTarget, listener: TcpListener) -> AppResult<Self> {
        let addr = listener.local_addr()?;
        let app = proxy_router(client, target);

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
                debug!("Proxy shutting down");
            });
            if let Err(e) = server.await {
                error!(error = %e, "Proxy server failed");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            server: Some(server),
        })
    }
}

#[async_trait]
impl Tunnel for ServiceProxy {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn close(&mut self) -> AppResult<()> {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            server
                .await
                .map_err(|e| AppError::internal(&format!("Proxy task failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Local TCP listener bridged to a pod port
pub struct PortForward {
    addr: SocketAddr,
    shutdown: CancellationToken,
    acceptor: Option<JoinHandle<()>>,
}

impl PortForward {
    pub fn start(
        pods: Api<Pod>,
        pod_name: String,
        pod_port: u16,
        listener: TcpListener,
    ) -> AppResult<Self> {
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let accept_shutdown = shutdown.clone();

        let acceptor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, pod = %pod_name, "Accepted port-forward connection");
                            let pods = pods.clone();
                            let pod_name = pod_name.clone();
                            let conn_shutdown = accept_shutdown.child_token();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = conn_shutdown.cancelled() => {}
                                    result = bridge(pods, &pod_name, pod_port, socket) => {
                                        if let Err(e) = result {
                                            warn!(error = %e, pod = %pod_name, "Port-forward connection failed");
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Port-forward accept failed");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            addr,
            shutdown,
            acceptor: Some(acceptor),
        })
    }
}

async fn bridge(pods: Api<Pod>, pod_name: &str, port: u16, mut socket: TcpStream) -> AppResult<()> {
    let mut forwarder = pods.portforward(pod_name, &[port]).await?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| AppError::internal(&format!("No stream for port {}", port)))?;

    let (sent, received) = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await?;
    debug!(sent, received, "Port-forward connection closed");

    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|e| AppError::internal(&format!("Port-forward ended with error: {}", e)))?;
    Ok(())
}

#[async_trait]
impl Tunnel for PortForward {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn close(&mut self) -> AppResult<()> {
        self.shutdown.cancel();
        if let Some(acceptor) = self.acceptor.take() {
            acceptor
                .await
                .map_err(|e| AppError::internal(&format!("Port-forward task failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> ServiceTarget {
        ServiceTarget {
            namespace: "netcap".to_string(),
            service: "netcap-hub".to_string(),
            port: 80,
        }
    }

    #[test]
    fn test_upstream_unavailability_is_a_gateway_error() {
        assert!(is_gateway_error(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_gateway_error(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_gateway_error(StatusCode::NOT_FOUND));
        assert!(!is_gateway_error(StatusCode::OK));
    }

    #[test]
    fn test_service_proxy_path() {
        assert_eq!(
            service_proxy_path(&hub(), "/"),
            "/api/v1/namespaces/netcap/services/netcap-hub:80/proxy/"
        );
        assert_eq!(
            service_proxy_path(&hub(), "/echo?x=1"),
            "/api/v1/namespaces/netcap/services/netcap-hub:80/proxy/echo?x=1"
        );
        assert_eq!(
            service_proxy_path(&hub(), "status"),
            "/api/v1/namespaces/netcap/services/netcap-hub:80/proxy/status"
        );
    }
}
