//! Backend adapters
//!
//! `Backend` is the capability interface over the two resource families the
//! orchestrator can deploy to. Exactly one adapter is active per process; it
//! is chosen from the settings file at startup. Nothing above this module
//! branches on which one it is.

pub mod mock;
pub mod platform;
pub mod retry;
pub mod sandbox;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Where the uploaded source archive lands on the resource
pub const ARCHIVE_PATH: &str = "/tmp/app.tar.gz";

/// Directory the archive is extracted into
pub const SOURCE_DIR: &str = "/app";

/// Env file written next to the application source
pub const ENV_PATH: &str = "/app/.env";

/// Resource family served by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFamily {
    /// Ephemeral sandboxed containers driven through a files + services API
    Sandbox,

    /// VM/image platform driven through a build-and-deploy pipeline
    Platform,
}

/// Remote resource as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: String,
}

/// Outcome of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created(ResourceInfo),
    AlreadyExists,
}

/// Runtime instance state, normalised across families
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Stopped,
    Other(String),
}

impl InstanceState {
    /// Normalise a backend state string
    pub fn parse(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "started" | "running" => InstanceState::Running,
            "stopped" | "suspended" => InstanceState::Stopped,
            other => InstanceState::Other(other.to_string()),
        }
    }
}

/// A live runtime instance of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInstance {
    pub id: String,
    pub state: InstanceState,
}

/// Long-lived service definition on a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
}

/// Service state as reported by a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub state: Option<ServiceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Receives build progress from a detached build task.
///
/// The task that owns a build is the only caller for its resource.
#[async_trait]
pub trait BuildObserver: Send + Sync {
    /// Append raw output
    fn append_output(&self, chunk: &str);

    /// Replace the whole output buffer (for backends that return full logs)
    fn replace_output(&self, output: &str);

    /// Record the exit code. Must not fail.
    async fn complete(&self, exit_code: i32);
}

/// Capability interface implemented by every backend adapter
#[async_trait]
pub trait Backend: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// Create the resource
    async fn provision(&self, name: &str) -> Result<ProvisionOutcome, DeployError>;

    /// Fetch the resource, `None` when the backend reports 404
    async fn get(&self, name: &str) -> Result<Option<ResourceInfo>, DeployError>;

    /// Open public ingress
    async fn set_public(&self, name: &str) -> Result<(), DeployError>;

    async fn write_file(
        &self,
        name: &str,
        path: &str,
        data: &[u8],
        mode: Option<&str>,
    ) -> Result<(), DeployError>;

    /// Read a file, `None` when it does not exist
    async fn read_file(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, DeployError>;

    /// Bring a hibernating resource back. Never fails the caller.
    async fn wake(&self, _name: &str) {}

    /// Store env vars as managed secrets
    async fn import_secrets(
        &self,
        _name: &str,
        _secrets: &BTreeMap<String, String>,
    ) -> Result<(), DeployError> {
        Ok(())
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<RuntimeInstance>, DeployError>;

    /// Runtime logs of the deployed application
    async fn service_logs(&self, name: &str) -> Result<String, DeployError>;

    async fn put_service(
        &self,
        _name: &str,
        _service: &str,
        _spec: &ServiceSpec,
    ) -> Result<(), DeployError> {
        Err(DeployError::Unsupported("put_service".to_string()))
    }

    async fn start_service(&self, _name: &str, _service: &str) -> Result<(), DeployError> {
        Err(DeployError::Unsupported("start_service".to_string()))
    }

    async fn stop_service(&self, _name: &str, _service: &str) -> Result<(), DeployError> {
        Err(DeployError::Unsupported("stop_service".to_string()))
    }

    async fn delete_service(&self, _name: &str, _service: &str) -> Result<(), DeployError> {
        Err(DeployError::Unsupported("delete_service".to_string()))
    }

    async fn get_service(
        &self,
        _name: &str,
        _service: &str,
    ) -> Result<Option<ServiceInfo>, DeployError> {
        Err(DeployError::Unsupported("get_service".to_string()))
    }

    async fn get_service_logs(&self, _name: &str, _service: &str) -> Result<String, DeployError> {
        Err(DeployError::Unsupported("get_service_logs".to_string()))
    }

    /// Run the platform build-and-deploy pipeline in a detached task.
    /// Returns once the task is spawned; the observer receives the outcome.
    async fn start_build_and_deploy(
        &self,
        _name: &str,
        _source_dir: &str,
        _secrets: &BTreeMap<String, String>,
        _observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError> {
        Err(DeployError::Unsupported("start_build_and_deploy".to_string()))
    }
}

/// Render env vars as a `KEY=VALUE` per line file
pub fn render_env_file(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}
