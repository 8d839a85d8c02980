//! SQLite deployment store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::deployment::{DeployStatus, Deployment};

use super::DeploymentStore;

const COLUMNS: &str = "id, owner_id, application_name, resource_name, resource_url, \
                       deploy_status, deploy_error, created_at, updated_at";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, DeployError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DeployError::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DeployError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(url, "Deployment store ready");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DeployError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Idempotent schema creation
    pub async fn ensure_schema(&self) -> Result<(), DeployError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                application_name TEXT NOT NULL,
                resource_name TEXT NOT NULL DEFAULT '',
                resource_url TEXT NOT NULL DEFAULT '',
                deploy_status TEXT NOT NULL DEFAULT 'preparing',
                deploy_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (owner_id, application_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_resource_name
            ON deployments (resource_name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Deployment schema ensured");
        Ok(())
    }

    fn row_to_deployment(row: &SqliteRow) -> Result<Deployment, DeployError> {
        let status: String = row.try_get("deploy_status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Deployment {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            application_name: row.try_get("application_name")?,
            resource_name: row.try_get("resource_name")?,
            resource_url: row.try_get("resource_url")?,
            deploy_status: status.parse().map_err(DeployError::Internal)?,
            deploy_error: row.try_get("deploy_error")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }
}

#[async_trait]
impl DeploymentStore for SqliteStore {
    async fn find(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Option<Deployment>, DeployError> {
        let query = format!(
            "SELECT {} FROM deployments WHERE owner_id = ?1 AND application_name = ?2",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(owner_id)
            .bind(application_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_deployment).transpose()
    }

    async fn find_by_resource(
        &self,
        resource_name: &str,
    ) -> Result<Option<Deployment>, DeployError> {
        if resource_name.is_empty() {
            return Ok(None);
        }
        let query = format!(
            "SELECT {} FROM deployments WHERE resource_name = ?1",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(resource_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_deployment).transpose()
    }

    async fn upsert(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<Deployment, DeployError> {
        let query = format!(
            r#"
            INSERT INTO deployments
                (owner_id, application_name, resource_name, resource_url, deploy_status, created_at, updated_at)
            VALUES (?1, ?2, '', '', 'preparing', ?3, ?3)
            ON CONFLICT (owner_id, application_name) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING {}
            "#,
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(owner_id)
            .bind(application_name)
            .bind(now())
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_deployment(&row)
    }

    async fn set_resource(
        &self,
        id: i64,
        resource_name: &str,
        resource_url: &str,
    ) -> Result<(), DeployError> {
        let result = sqlx::query(
            "UPDATE deployments SET resource_name = ?1, resource_url = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(resource_name)
        .bind(resource_url)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeployError::NotFound(format!("deployment {}", id)));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        resource_name: &str,
        status: DeployStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError> {
        let result = sqlx::query(
            "UPDATE deployments SET deploy_status = ?1, deploy_error = ?2, updated_at = ?3 WHERE resource_name = ?4",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now())
        .bind(resource_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeployError::NotFound(format!(
                "deployment for resource {}",
                resource_name
            )));
        }
        Ok(())
    }

    async fn touch(&self, id: i64) -> Result<(), DeployError> {
        sqlx::query("UPDATE deployments SET updated_at = ?1 WHERE id = ?2")
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
