//! Error types shared across the crate

use thiserror::Error;

/// Result alias used by every fallible library call
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A bundled permission document could not be used
    #[error("Invalid permission policy: {0}")]
    Policy(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn policy(msg: &str) -> Self {
        AppError::Policy(msg.to_string())
    }

    pub fn timeout(msg: &str) -> Self {
        AppError::Timeout(msg.to_string())
    }

    /// True for our own `NotFound` and for a 404 returned by the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::NotFound(_) => true,
            AppError::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }
}
