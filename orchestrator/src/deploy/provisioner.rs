//! Resource provisioning
//!
//! Create-or-get of the remote resource backing an application. Calling
//! `prepare` again for a live resource makes no mutating backend call.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{Backend, ProvisionOutcome};
use crate::errors::DeployError;
use crate::models::deployment::PreparedResource;
use crate::store::DeploymentStore;

pub struct Provisioner {
    backend: Arc<dyn Backend>,
    store: Arc<dyn DeploymentStore>,
    prefix: String,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn DeploymentStore>, prefix: &str) -> Self {
        Self {
            backend,
            store,
            prefix: prefix.to_string(),
        }
    }

    /// Resource name for a deployment id
    pub fn resource_name(&self, id: i64) -> String {
        format!("{}-{}", self.prefix, id)
    }

    pub async fn prepare(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<PreparedResource, DeployError> {
        if application_name.trim().is_empty() {
            return Err(DeployError::Validation("appName is required".to_string()));
        }

        if let Some(existing) = self.store.find(owner_id, application_name).await? {
            if existing.has_resource() {
                if let Some(info) = self.backend.get(&existing.resource_name).await? {
                    let resource_url = if existing.resource_url.is_empty() {
                        info.url.unwrap_or_default()
                    } else {
                        existing.resource_url
                    };
                    return Ok(PreparedResource {
                        resource_name: existing.resource_name,
                        resource_url,
                    });
                }
                warn!(
                    resource = %existing.resource_name,
                    app = application_name,
                    "Resource disappeared from the backend, recreating"
                );
            }
        }

        let row = self.store.upsert(owner_id, application_name).await?;
        let resource_name = if row.has_resource() {
            row.resource_name.clone()
        } else {
            self.resource_name(row.id)
        };

        let url = match self.backend.provision(&resource_name).await? {
            ProvisionOutcome::Created(info) => info.url,
            ProvisionOutcome::AlreadyExists => {
                info!(resource = %resource_name, "Resource already exists, reusing it");
                self.backend
                    .get(&resource_name)
                    .await?
                    .and_then(|info| info.url)
            }
        };
        let resource_url = url.unwrap_or_default();

        self.backend.set_public(&resource_name).await?;
        self.store
            .set_resource(row.id, &resource_name, &resource_url)
            .await?;

        info!(
            resource = %resource_name,
            url = %resource_url,
            app = application_name,
            "Prepared resource"
        );
        Ok(PreparedResource {
            resource_name,
            resource_url,
        })
    }
}
