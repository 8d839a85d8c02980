//! Artifact transfer
//!
//! Uploads the source archive, the env file and any files the build strategy
//! needs. Each write is a single backend call; repeating a transfer simply
//! overwrites the previous files.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{render_env_file, Backend, ARCHIVE_PATH, ENV_PATH};
use crate::errors::DeployError;
use crate::models::deployment::Deployment;
use crate::store::DeploymentStore;
use crate::utils::sha256_hash;

/// A file a build strategy needs on the resource before launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub contents: Vec<u8>,
    pub mode: Option<String>,
}

pub struct ArtifactTransfer {
    backend: Arc<dyn Backend>,
    store: Arc<dyn DeploymentStore>,
}

impl ArtifactTransfer {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn DeploymentStore>) -> Self {
        Self { backend, store }
    }

    /// The deployment to push to; it must have been prepared
    pub async fn resolve(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Deployment, DeployError> {
        self.store
            .find(owner_id, application_name)
            .await?
            .filter(Deployment::has_resource)
            .ok_or_else(|| DeployError::NotFound("No deployment found. Run prepare first.".to_string()))
    }

    pub async fn upload(
        &self,
        deployment: &Deployment,
        archive: &[u8],
        env: &BTreeMap<String, String>,
        staged: &[StagedFile],
    ) -> Result<(), DeployError> {
        let name = deployment.resource_name.as_str();

        self.backend.wake(name).await;

        info!(
            resource = name,
            bytes = archive.len(),
            sha256 = %sha256_hash(archive),
            "Uploading archive"
        );
        self.backend
            .write_file(name, ARCHIVE_PATH, archive, None)
            .await?;

        if !env.is_empty() {
            let env_file = render_env_file(env);
            self.backend
                .write_file(name, ENV_PATH, env_file.as_bytes(), None)
                .await?;

            if let Err(e) = self.backend.import_secrets(name, env).await {
                warn!(resource = name, "Failed to import secrets: {}", e);
            }
        }

        for file in staged {
            self.backend
                .write_file(name, &file.path, &file.contents, file.mode.as_deref())
                .await?;
        }

        self.store.touch(deployment.id).await?;
        Ok(())
    }
}
