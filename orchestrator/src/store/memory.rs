//! In-memory deployment store

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::DeployError;
use crate::models::deployment::{DeployStatus, Deployment};

use super::DeploymentStore;

/// Rows live for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<i64, Deployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn find(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Option<Deployment>, DeployError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .values()
            .find(|d| d.owner_id == owner_id && d.application_name == application_name)
            .cloned())
    }

    async fn find_by_resource(
        &self,
        resource_name: &str,
    ) -> Result<Option<Deployment>, DeployError> {
        if resource_name.is_empty() {
            return Ok(None);
        }
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .values()
            .find(|d| d.resource_name == resource_name)
            .cloned())
    }

    async fn upsert(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Deployment, DeployError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        if let Some(existing) = rows
            .values_mut()
            .find(|d| d.owner_id == owner_id && d.application_name == application_name)
        {
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
        let deployment = Deployment {
            id,
            owner_id: owner_id.to_string(),
            application_name: application_name.to_string(),
            resource_name: String::new(),
            resource_url: String::new(),
            deploy_status: DeployStatus::Preparing,
            deploy_error: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(id, deployment.clone());
        Ok(deployment)
    }

    async fn set_resource(
        &self,
        id: i64,
        resource_name: &str,
        resource_url: &str,
    ) -> Result<(), DeployError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;
        row.resource_name = resource_name.to_string();
        row.resource_url = resource_url.to_string();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(
        &self,
        resource_name: &str,
        status: DeployStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let row = rows
            .values_mut()
            .find(|d| !resource_name.is_empty() && d.resource_name == resource_name)
            .ok_or_else(|| {
                DeployError::NotFound(format!("deployment for resource {}", resource_name))
            })?;
        row.deploy_status = status;
        row.deploy_error = error.map(ToOwned::to_owned);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn touch(&self, id: i64) -> Result<(), DeployError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        if let Some(row) = rows.get_mut(&id) {
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}
