//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::app::options::{AppOptions, BackendOptions};
use crate::backend::platform::PlatformBackend;
use crate::backend::sandbox::SandboxBackend;
use crate::backend::{Backend, BackendFamily};
use crate::deploy::image_build::ImageBuild;
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::runner::BuildStrategy;
use crate::deploy::script_build::ScriptBuild;
use crate::errors::DeployError;
use crate::store::SqliteStore;

/// Main application state
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Connect the store and wire the configured backend into an orchestrator
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let store = Arc::new(
            SqliteStore::connect(&options.database.url, options.database.max_connections).await?,
        );
        let (backend, strategy) = build_backend(&options.backend)?;
        info!(
            backend = ?backend.family(),
            strategy = strategy.name(),
            "Backend configured"
        );

        let orchestrator = Arc::new(Orchestrator::new(
            backend,
            store.clone(),
            strategy,
            options.orchestrator.clone(),
        )?);

        Ok(Self {
            store,
            orchestrator,
        })
    }

    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.store.close().await;
        Ok(())
    }
}

/// The backend adapter and the build strategy that goes with its family
pub fn build_backend(
    options: &BackendOptions,
) -> Result<(Arc<dyn Backend>, Arc<dyn BuildStrategy>), DeployError> {
    match options.family {
        BackendFamily::Sandbox => {
            let token = read_token(&options.sandbox.token_env)?;
            let backend = SandboxBackend::new(
                &options.sandbox.api_base,
                token,
                options.retry.clone(),
                options.request_timeout,
            )?;
            let strategy = ScriptBuild::new(options.build_poll_interval, options.build_timeout);
            Ok((Arc::new(backend), Arc::new(strategy)))
        }
        BackendFamily::Platform => {
            let token = read_token(&options.platform.token_env)?;
            let backend = PlatformBackend::new(
                &options.platform,
                token,
                options.retry.clone(),
                options.request_timeout,
            )?;
            Ok((Arc::new(backend), Arc::new(ImageBuild)))
        }
    }
}

fn read_token(env_name: &str) -> Result<SecretString, DeployError> {
    match std::env::var(env_name) {
        Ok(token) if !token.trim().is_empty() => Ok(SecretString::from(token)),
        _ => Err(DeployError::Config(format!(
            "Backend token missing: set {}",
            env_name
        ))),
    }
}
