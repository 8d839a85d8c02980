//! Application configuration options

use std::time::Duration;

use crate::backend::retry::RetryPolicy;
use crate::backend::BackendFamily;
use crate::deploy::orchestrator::OrchestratorOptions;
use crate::storage::settings::{PlatformSettings, SandboxSettings, Settings};

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,
    pub server: ServerOptions,
    pub database: DatabaseOptions,
    pub backend: BackendOptions,
    pub orchestrator: OrchestratorOptions,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                max_body_bytes: settings.server.max_body_bytes,
            },
            database: DatabaseOptions {
                url: settings.database.url.clone(),
                max_connections: settings.database.max_connections,
            },
            backend: BackendOptions {
                family: settings.backend,
                sandbox: settings.sandbox.clone(),
                platform: settings.platform.clone(),
                retry: settings.retry.policy(),
                request_timeout: settings.request_timeout(),
                build_poll_interval: Duration::from_secs(settings.build.poll_interval_secs),
                build_timeout: Duration::from_secs(settings.build.timeout_secs),
            },
            orchestrator: OrchestratorOptions {
                resource_prefix: settings.resource_prefix.clone(),
                ..OrchestratorOptions::default()
            },
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            url: "sqlite://shipyard.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Which backend to build and how to talk to it
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub family: BackendFamily,
    pub sandbox: SandboxSettings,
    pub platform: PlatformSettings,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub build_poll_interval: Duration,
    pub build_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            family: BackendFamily::Sandbox,
            sandbox: SandboxSettings::default(),
            platform: PlatformSettings::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            build_poll_interval: Duration::from_secs(5),
            build_timeout: Duration::from_secs(20 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.resource_prefix = "acme".to_string();
        settings.server.port = 9090;
        settings.server.max_body_bytes = 1024;
        settings.build.timeout_secs = 60;

        let options = AppOptions::from_settings(&settings);
        assert_eq!(options.orchestrator.resource_prefix, "acme");
        assert_eq!(options.orchestrator.stream_timeout, Duration::from_secs(600));
        assert_eq!(options.server.port, 9090);
        assert_eq!(options.server.max_body_bytes, 1024);
        assert_eq!(options.backend.build_timeout, Duration::from_secs(60));
        assert_eq!(options.backend.family, BackendFamily::Sandbox);
    }
}
