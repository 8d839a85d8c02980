//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::AppStatus;

/// Persisted deployment status column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Preparing,
    Building,
    Deployed,
    Idle,
    Error,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Preparing => "preparing",
            DeployStatus::Building => "building",
            DeployStatus::Deployed => "deployed",
            DeployStatus::Idle => "idle",
            DeployStatus::Error => "error",
        }
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(DeployStatus::Preparing),
            "building" => Ok(DeployStatus::Building),
            "deployed" => Ok(DeployStatus::Deployed),
            "idle" => Ok(DeployStatus::Idle),
            "error" => Ok(DeployStatus::Error),
            other => Err(format!("Invalid deploy status: {}", other)),
        }
    }
}

/// A deployment row. One per (owner, application).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: i64,
    pub owner_id: String,
    pub application_name: String,

    /// Backend identifier, empty until the provisioner assigns one
    pub resource_name: String,

    /// Public endpoint, may stay empty until the backend reports one
    pub resource_url: String,

    pub deploy_status: DeployStatus,
    pub deploy_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Whether the provisioner has bound a resource to this row
    pub fn has_resource(&self) -> bool {
        !self.resource_name.is_empty()
    }

    /// URL as an option, `None` when still unassigned
    pub fn url(&self) -> Option<String> {
        if self.resource_url.is_empty() {
            None
        } else {
            Some(self.resource_url.clone())
        }
    }
}

/// Result of a prepare call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedResource {
    pub resource_name: String,
    pub resource_url: String,
}

/// Reconciled status for one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: AppStatus,
    pub url: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(status: AppStatus, url: Option<String>) -> Self {
        Self {
            status,
            url,
            error: None,
            message: None,
        }
    }

    pub fn not_found() -> Self {
        Self::new(AppStatus::NotFound, None)
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Build output and runtime logs for one application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentLogs {
    pub build_log: Option<String>,
    pub service_logs: Option<String>,
}
