//! Liveness probe against a deployed application's public URL

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::errors::DeployError;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Responding,
    NotResponding,
}

#[derive(Debug, Clone)]
pub struct LivenessProbe {
    client: Client,
}

impl LivenessProbe {
    pub fn new(timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Any answer below 500 counts as responding; errors and timeouts don't
    pub async fn check(&self, url: &str) -> Liveness {
        if url.is_empty() {
            return Liveness::NotResponding;
        }
        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() < 500 => Liveness::Responding,
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "Probe got a server error");
                Liveness::NotResponding
            }
            Err(e) => {
                debug!(url, "Probe failed: {}", e);
                Liveness::NotResponding
            }
        }
    }

    /// Probe in the background, ignoring the result. Used to wake
    /// auto-stopped runtimes.
    pub fn fire_and_forget(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        let probe = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            probe.check(&url).await;
        });
    }
}
