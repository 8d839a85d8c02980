//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::retry::RetryPolicy;
use crate::backend::BackendFamily;
use crate::logs::LogLevel;

/// Orchestrator settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for the rolling log file
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    /// Which backend family this process deploys to
    #[serde(default = "default_backend")]
    pub backend: BackendFamily,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub platform: PlatformSettings,

    /// Prefix for derived resource names (`<prefix>-<id>`)
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Default timeout for outbound HTTP calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum delay for graceful shutdown
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_backend() -> BackendFamily {
    BackendFamily::Sandbox
}

fn default_resource_prefix() -> String {
    "shipyard".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            backend: default_backend(),
            sandbox: SandboxSettings::default(),
            platform: PlatformSettings::default(),
            resource_prefix: default_resource_prefix(),
            build: BuildSettings::default(),
            retry: RetrySettings::default(),
            request_timeout_secs: default_request_timeout(),
            max_shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body; archives arrive base64-encoded
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Deployment store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://shipyard.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Sandbox family API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_sandbox_api_base")]
    pub api_base: String,

    /// Environment variable holding the API token
    #[serde(default = "default_sandbox_token_env")]
    pub token_env: String,
}

fn default_sandbox_api_base() -> String {
    "https://api.sprites.dev".to_string()
}

fn default_sandbox_token_env() -> String {
    "SPRITES_TOKEN".to_string()
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            api_base: default_sandbox_api_base(),
            token_env: default_sandbox_token_env(),
        }
    }
}

/// Platform family API and CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_platform_api_base")]
    pub api_base: String,

    /// Environment variable holding the API token
    #[serde(default = "default_platform_token_env")]
    pub token_env: String,

    /// Organisation new apps are created in
    #[serde(default = "default_org_slug")]
    pub org_slug: String,

    #[serde(default = "default_flyctl_path")]
    pub flyctl_path: String,

    /// Local directory holding one source tree per resource
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Public domain apps are served under
    #[serde(default = "default_app_domain")]
    pub app_domain: String,
}

fn default_platform_api_base() -> String {
    "https://api.machines.dev".to_string()
}

fn default_platform_token_env() -> String {
    "FLY_API_TOKEN".to_string()
}

fn default_org_slug() -> String {
    "personal".to_string()
}

fn default_flyctl_path() -> String {
    "flyctl".to_string()
}

fn default_work_dir() -> String {
    "/var/lib/shipyard/apps".to_string()
}

fn default_app_domain() -> String {
    "fly.dev".to_string()
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            api_base: default_platform_api_base(),
            token_env: default_platform_token_env(),
            org_slug: default_org_slug(),
            flyctl_path: default_flyctl_path(),
            work_dir: default_work_dir(),
            app_domain: default_app_domain(),
        }
    }
}

/// Build watcher settings (sandbox family)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Ceiling after which a build is reported as failed
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_build_timeout() -> u64 {
    20 * 60
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_build_timeout(),
        }
    }
}

/// Transient upstream error retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs(self.base_delay_secs),
        }
    }
}
