//! Image build strategy for the platform family
//!
//! The platform builds and rolls out the image itself; all this does is hand
//! the extracted source directory to the backend's pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{Backend, BuildObserver, SOURCE_DIR};
use crate::deploy::runner::BuildStrategy;
use crate::deploy::transfer::StagedFile;
use crate::errors::DeployError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageBuild;

#[async_trait]
impl BuildStrategy for ImageBuild {
    fn name(&self) -> &'static str {
        "image"
    }

    fn staged_files(&self) -> Vec<StagedFile> {
        Vec::new()
    }

    async fn launch(
        &self,
        backend: Arc<dyn Backend>,
        resource_name: &str,
        secrets: &BTreeMap<String, String>,
        observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError> {
        backend
            .start_build_and_deploy(resource_name, SOURCE_DIR, secrets, observer)
            .await
    }
}
