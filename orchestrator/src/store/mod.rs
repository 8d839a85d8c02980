//! Deployment persistence
//!
//! One row per (owner, application). The SQLite store is what the service
//! runs on; the memory store backs tests and throwaway runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::deployment::{DeployStatus, Deployment};

/// Storage for deployment rows
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Look up the row of one application
    async fn find(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Option<Deployment>, DeployError>;

    /// Look up a row by its bound resource
    async fn find_by_resource(&self, resource_name: &str)
        -> Result<Option<Deployment>, DeployError>;

    /// Insert a fresh row at `preparing`, or touch `updated_at` on the
    /// existing one. Returns the row either way.
    async fn upsert(&self, owner_id: &str, application_name: &str)
        -> Result<Deployment, DeployError>;

    /// Bind the resource identity and URL
    async fn set_resource(
        &self,
        id: i64,
        resource_name: &str,
        resource_url: &str,
    ) -> Result<(), DeployError>;

    /// Set the status of the row bound to `resource_name`; `error` replaces
    /// the stored error (`None` clears it)
    async fn set_status(
        &self,
        resource_name: &str,
        status: DeployStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError>;

    /// Bump `updated_at`
    async fn touch(&self, id: i64) -> Result<(), DeployError>;
}
