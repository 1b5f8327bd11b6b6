//! HTTP reachability probe

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{AppError, AppResult};

/// Pause between failed attempts
pub const RETRY_PAUSE: Duration = Duration::from_secs(1);

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    /// Succeeds once `url` answers with a 2xx status
    async fn probe(&self, url: &str, attempts: u32, timeout: Duration) -> AppResult<()>;
}

/// `Probe` over a plain reqwest client
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    pause: Duration,
}

impl HttpConnector {
    pub fn new() -> AppResult<Self> {
        Self::with_pause(RETRY_PAUSE)
    }

    pub fn with_pause(pause: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| AppError::internal(&format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, pause })
    }
}

#[async_trait]
impl Probe for HttpConnector {
    async fn probe(&self, url: &str, attempts: u32, timeout: Duration) -> AppResult<()> {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let answered = self
                .client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match answered {
                Ok(response) => {
                    debug!(url, status = %response.status(), attempt, "Probe answered");
                    return Ok(());
                }
                Err(e) => {
                    debug!(url, attempt, error = %e, "Probe attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.pause).await;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(AppError::internal(&format!("No probe attempt made for {}", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    async fn serve(status: StatusCode) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(move || async move { status }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_success_status_is_reachable() {
        let url = serve(StatusCode::OK).await;
        let connector = HttpConnector::with_pause(Duration::from_millis(10)).unwrap();

        connector
            .probe(&url, 1, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_not_reachable() {
        let url = serve(StatusCode::SERVICE_UNAVAILABLE).await;
        let connector = HttpConnector::with_pause(Duration::from_millis(10)).unwrap();

        let result = connector.probe(&url, 2, Duration::from_secs(2)).await;

        assert!(matches!(result, Err(AppError::Http(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = HttpConnector::with_pause(Duration::from_millis(10)).unwrap();
        let result = connector
            .probe(&format!("http://{}", addr), 3, Duration::from_millis(200))
            .await;

        assert!(matches!(result, Err(AppError::Http(_))));
    }
}
