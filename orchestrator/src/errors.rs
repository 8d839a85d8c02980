//! Error types for the Shipyard orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable ({status}) after retries: {body}")]
    UpstreamTransient { status: u16, body: String },

    #[error("Upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// HTTP status code the caller should render this error with
    pub fn status_code(&self) -> u16 {
        match self {
            DeployError::Validation(_) => 400,
            DeployError::Auth(_) => 401,
            DeployError::NotFound(_) => 404,
            DeployError::Conflict(_) => 409,
            DeployError::Upstream { .. } => 502,
            DeployError::UpstreamTransient { .. } => 503,
            _ => 500,
        }
    }

    /// Build an error from a non-2xx upstream response
    pub fn from_upstream(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 502 || status == 503 {
            DeployError::UpstreamTransient { status, body }
        } else {
            DeployError::Upstream { status, body }
        }
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
