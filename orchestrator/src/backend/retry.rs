//! Retry wrapper for outbound backend calls
//!
//! 502 and 503 are retried with a linearly growing delay. Every other status
//! is handed straight back to the caller, which decides whether it is an
//! error (a 404 on an existence check is not).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::DeployError;

/// Retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay unit; attempt `n` waits `n * base_delay` before the next try
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Minimal view of an HTTP response the wrapper needs
#[async_trait]
pub trait UpstreamResponse: Send + Sized {
    fn status_code(&self) -> u16;

    /// Consume the body as text; unreadable bodies become empty strings
    async fn into_text(self) -> String;
}

#[async_trait]
impl UpstreamResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    async fn into_text(self) -> String {
        self.text().await.unwrap_or_default()
    }
}

pub fn is_transient(status: u16) -> bool {
    status == 502 || status == 503
}

/// Run `send` until it yields a non-transient response or attempts run out
pub async fn with_retry<R, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut send: F,
) -> Result<R, DeployError>
where
    R: UpstreamResponse,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, DeployError>>,
{
    let mut attempt = 1;
    loop {
        let response = send().await?;
        let status = response.status_code();
        if !is_transient(status) {
            return Ok(response);
        }

        let body = response.into_text().await;
        if attempt >= policy.max_attempts {
            warn!(
                call = label,
                status,
                attempts = attempt,
                "Upstream still unavailable, giving up"
            );
            return Err(DeployError::UpstreamTransient { status, body });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            call = label,
            status,
            attempt,
            max_attempts = policy.max_attempts,
            body = %body,
            "Transient upstream error, retrying in {:?}",
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Turn a non-2xx response into a typed error
pub async fn ensure_success<R: UpstreamResponse>(response: R) -> Result<R, DeployError> {
    let status = response.status_code();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let body = response.into_text().await;
    Err(DeployError::from_upstream(status, body))
}
