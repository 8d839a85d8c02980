//! Build runner
//!
//! Starts a build through the active strategy and returns as soon as it is
//! launched. The strategy's detached task reports back through a
//! [`RunnerObserver`], which owns the tracker entry and the final row update.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::backend::{Backend, BuildObserver};
use crate::deploy::fsm::AppStatus;
use crate::deploy::tracker::BuildRegistry;
use crate::deploy::transfer::StagedFile;
use crate::errors::DeployError;
use crate::models::deployment::DeployStatus;
use crate::store::DeploymentStore;
use crate::utils::tail_chars;

/// Characters of output kept as the stored build error
pub const ERROR_TAIL_CHARS: usize = 500;

/// How a backend family turns an uploaded archive into a running app
#[async_trait]
pub trait BuildStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Files to upload alongside the archive
    fn staged_files(&self) -> Vec<StagedFile>;

    /// Kick off the build. Must return once it is running; completion goes
    /// to `observer` exactly once.
    async fn launch(
        &self,
        backend: Arc<dyn Backend>,
        resource_name: &str,
        secrets: &BTreeMap<String, String>,
        observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError>;
}

pub struct BuildRunner {
    backend: Arc<dyn Backend>,
    store: Arc<dyn DeploymentStore>,
    registry: Arc<BuildRegistry>,
    strategy: Arc<dyn BuildStrategy>,
}

impl BuildRunner {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn DeploymentStore>,
        registry: Arc<BuildRegistry>,
        strategy: Arc<dyn BuildStrategy>,
    ) -> Self {
        Self {
            backend,
            store,
            registry,
            strategy,
        }
    }

    pub fn staged_files(&self) -> Vec<StagedFile> {
        self.strategy.staged_files()
    }

    /// Fail early when a build is already running for `resource_name`
    pub fn ensure_idle(&self, resource_name: &str) -> Result<(), DeployError> {
        if self.registry.is_active(resource_name) {
            return Err(DeployError::Conflict(
                "a deploy is already in progress".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn start_build(
        &self,
        resource_name: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<AppStatus, DeployError> {
        self.registry.begin(resource_name)?;

        if let Err(e) = self
            .store
            .set_status(resource_name, DeployStatus::Building, None)
            .await
        {
            self.registry.finish(resource_name, -1);
            return Err(e);
        }

        let observer = Arc::new(RunnerObserver::new(
            resource_name,
            self.registry.clone(),
            self.store.clone(),
        ));

        if let Err(e) = self
            .strategy
            .launch(self.backend.clone(), resource_name, secrets, observer.clone())
            .await
        {
            error!(resource = resource_name, strategy = self.strategy.name(), "Failed to start build: {}", e);
            observer.append_output(&format!("Failed to start build: {}\n", e));
            observer.complete(-1).await;
            return Err(e);
        }

        info!(resource = resource_name, strategy = self.strategy.name(), "Build started");
        Ok(AppStatus::Building)
    }
}

/// Feeds one build's progress into the registry and persists the outcome
pub struct RunnerObserver {
    resource_name: String,
    registry: Arc<BuildRegistry>,
    store: Arc<dyn DeploymentStore>,
}

impl RunnerObserver {
    pub fn new(
        resource_name: &str,
        registry: Arc<BuildRegistry>,
        store: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            registry,
            store,
        }
    }
}

#[async_trait]
impl BuildObserver for RunnerObserver {
    fn append_output(&self, chunk: &str) {
        self.registry.append(&self.resource_name, chunk);
    }

    fn replace_output(&self, output: &str) {
        self.registry.replace(&self.resource_name, output);
    }

    async fn complete(&self, exit_code: i32) {
        let output = self
            .registry
            .finish(&self.resource_name, exit_code)
            .unwrap_or_default();

        let result = if exit_code == 0 {
            self.store
                .set_status(&self.resource_name, DeployStatus::Deployed, None)
                .await
        } else {
            let tail = tail_chars(&output, ERROR_TAIL_CHARS);
            self.store
                .set_status(&self.resource_name, DeployStatus::Error, Some(tail))
                .await
        };

        match result {
            Ok(()) => info!(resource = %self.resource_name, exit_code, "Build completed"),
            Err(e) => error!(
                resource = %self.resource_name,
                exit_code,
                "Failed to record build result: {}",
                e
            ),
        }
    }
}
