//! Platform backend adapter
//!
//! Applications are machine-backed apps on the VM platform. App and machine
//! state come from the machines REST API; ingress, secrets, logs and the
//! build-and-deploy pipeline go through the `flyctl` CLI. Files "on the
//! resource" live in a local work directory per app, which is what the CLI
//! deploys from.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backend::retry::{ensure_success, with_retry, RetryPolicy};
use crate::backend::{
    render_env_file, Backend, BackendFamily, BuildObserver, InstanceState, ProvisionOutcome,
    ResourceInfo, RuntimeInstance, ARCHIVE_PATH,
};
use crate::errors::DeployError;
use crate::storage::settings::PlatformSettings;

const SECRETS_TIMEOUT: Duration = Duration::from_secs(15);
const LOGS_TIMEOUT: Duration = Duration::from_secs(30);
const IPS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct PlatformApp {
    name: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Machine {
    id: String,
    #[serde(default)]
    state: String,
}

/// Machines API plus `flyctl` driver
pub struct PlatformBackend {
    client: Client,
    base: Url,
    token: SecretString,
    org_slug: String,
    flyctl: String,
    work_dir: PathBuf,
    app_domain: String,
    retry: RetryPolicy,
}

impl PlatformBackend {
    pub fn new(
        settings: &PlatformSettings,
        token: SecretString,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let base = Url::parse(&settings.api_base).map_err(|e| {
            DeployError::Config(format!(
                "Invalid platform API base {}: {}",
                settings.api_base, e
            ))
        })?;
        if base.cannot_be_a_base() {
            return Err(DeployError::Config(format!(
                "Platform API base cannot carry a path: {}",
                settings.api_base
            )));
        }

        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base,
            token,
            org_slug: settings.org_slug.clone(),
            flyctl: settings.flyctl_path.clone(),
            work_dir: PathBuf::from(&settings.work_dir),
            app_domain: settings.app_domain.clone(),
            retry,
        })
    }

    /// Public URL of an app
    pub fn app_url(&self, name: &str) -> String {
        format!("https://{}.{}", name, self.app_domain)
    }

    /// Map a resource path onto the app's local work directory
    pub fn local_path(&self, name: &str, path: &str) -> Result<PathBuf, DeployError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DeployError::Validation(format!("Invalid resource path: {}", path)));
        }
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(DeployError::Validation(format!("Invalid resource name: {}", name)));
        }
        Ok(self.work_dir.join(name).join(relative))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DeployError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DeployError::Config("Platform API base cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("v1")
            .push("apps")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send<F>(&self, label: &str, build: F) -> Result<Response, DeployError>
    where
        F: Fn() -> RequestBuilder,
    {
        with_retry(&self.retry, label, || {
            let request = build();
            async move { Ok(request.send().await?) }
        })
        .await
    }

    fn cli(&self) -> Command {
        let mut command = Command::new(&self.flyctl);
        command
            .env("FLY_API_TOKEN", self.token.expose_secret())
            .kill_on_drop(true);
        command
    }

    /// Run a short `flyctl` command to completion and return its stdout
    async fn run_cli(
        &self,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<String, DeployError> {
        let mut child = self
            .cli()
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DeployError::Internal(format!("Failed to run {}: {}", self.flyctl, e)))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DeployError::Internal(format!(
                    "flyctl {} timed out after {:?}",
                    args.join(" "),
                    timeout
                ))
            })??;

        if !output.status.success() {
            return Err(DeployError::Internal(format!(
                "flyctl {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Backend for PlatformBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Platform
    }

    async fn provision(&self, name: &str) -> Result<ProvisionOutcome, DeployError> {
        let url = self.endpoint(&[])?;
        let body = json!({ "app_name": name, "org_slug": self.org_slug });
        let response = self
            .send("create_app", || self.request(Method::POST, url.clone()).json(&body))
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            if status == 422 || text.contains("already been taken") || text.contains("already exists") {
                return Ok(ProvisionOutcome::AlreadyExists);
            }
            return Err(DeployError::from_upstream(status, text));
        }

        info!(app = name, "Created platform app");
        Ok(ProvisionOutcome::Created(ResourceInfo {
            name: name.to_string(),
            url: Some(self.app_url(name)),
            status: "pending".to_string(),
        }))
    }

    async fn get(&self, name: &str) -> Result<Option<ResourceInfo>, DeployError> {
        let url = self.endpoint(&[name])?;
        let response = self
            .send("get_app", || self.request(Method::GET, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let app: PlatformApp = ensure_success(response).await?.json().await?;
        Ok(Some(ResourceInfo {
            url: Some(self.app_url(&app.name)),
            name: app.name,
            status: app.status,
        }))
    }

    async fn set_public(&self, name: &str) -> Result<(), DeployError> {
        match self
            .run_cli(&["ips", "allocate-v4", "--shared", "-a", name], None, IPS_TIMEOUT)
            .await
        {
            Ok(_) => Ok(()),
            Err(DeployError::Internal(msg)) if msg.contains("already") => {
                debug!(app = name, "Shared IPv4 already allocated");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn write_file(
        &self,
        name: &str,
        path: &str,
        data: &[u8],
        mode: Option<&str>,
    ) -> Result<(), DeployError> {
        let target = self.local_path(name, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        if let Some(mode) = mode {
            set_mode(&target, mode).await?;
        }

        debug!(app = name, path = %target.display(), bytes = data.len(), "Wrote file");
        Ok(())
    }

    async fn read_file(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, DeployError> {
        let target = self.local_path(name, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn import_secrets(
        &self,
        name: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), DeployError> {
        if secrets.is_empty() {
            return Ok(());
        }
        let body = render_env_file(secrets);
        self.run_cli(
            &["secrets", "import", "--stage", "-a", name],
            Some(&body),
            SECRETS_TIMEOUT,
        )
        .await?;
        info!(app = name, count = secrets.len(), "Imported secrets");
        Ok(())
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<RuntimeInstance>, DeployError> {
        let url = self.endpoint(&[name, "machines"])?;
        let response = self
            .send("list_machines", || self.request(Method::GET, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let machines: Vec<Machine> = ensure_success(response).await?.json().await?;
        Ok(machines
            .into_iter()
            .map(|m| RuntimeInstance {
                id: m.id,
                state: InstanceState::parse(&m.state),
            })
            .collect())
    }

    async fn service_logs(&self, name: &str) -> Result<String, DeployError> {
        self.run_cli(&["logs", "-a", name, "--no-tail"], None, LOGS_TIMEOUT)
            .await
    }

    async fn start_build_and_deploy(
        &self,
        name: &str,
        source_dir: &str,
        secrets: &BTreeMap<String, String>,
        observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError> {
        let source = self.local_path(name, source_dir)?;
        let archive = self.local_path(name, ARCHIVE_PATH)?;
        tokio::fs::create_dir_all(&source).await?;

        let args = deploy_args(name, secrets);
        info!(app = name, command = %redact_args(&args), "Starting image build");

        let mut deploy = self.cli();
        deploy
            .args(&args)
            .current_dir(&source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let app = name.to_string();
        tokio::spawn(async move {
            let exit_code = match run_image_build(&archive, &source, deploy, observer.as_ref()).await {
                Ok(code) => code,
                Err(e) => {
                    error!(app = %app, "Image build failed to run: {}", e);
                    observer.append_output(&format!("{}\n", e));
                    -1
                }
            };
            info!(app = %app, exit_code, "Image build finished");
            observer.complete(exit_code).await;
        });
        Ok(())
    }
}

const BUILD_SECRET_FLAG: &str = "--build-secret";

/// `flyctl deploy` arguments; each build secret is a `NAME=VALUE` flag
fn deploy_args(name: &str, secrets: &BTreeMap<String, String>) -> Vec<String> {
    let mut args: Vec<String> = ["deploy", "--remote-only", "--app", name, "--yes"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for (key, value) in secrets {
        args.push(BUILD_SECRET_FLAG.to_string());
        args.push(format!("{}={}", key, value));
    }
    args
}

/// Command line for logs, with build secret values masked
fn redact_args(args: &[String]) -> String {
    let mut shown = Vec::with_capacity(args.len());
    let mut after_flag = false;
    for arg in args {
        if after_flag {
            let key = arg.split_once('=').map(|(k, _)| k).unwrap_or(arg);
            shown.push(format!("{}=***", key));
        } else {
            shown.push(arg.clone());
        }
        after_flag = arg == BUILD_SECRET_FLAG;
    }
    shown.join(" ")
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: &str) -> Result<(), DeployError> {
    use std::os::unix::fs::PermissionsExt;
    let bits = u32::from_str_radix(mode, 8)
        .map_err(|_| DeployError::Validation(format!("Invalid file mode: {}", mode)))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(bits)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: &str) -> Result<(), DeployError> {
    Ok(())
}

/// Extract the archive and run the deploy command, streaming output.
/// Returns the exit code of the first step that fails, or of the deploy.
async fn run_image_build(
    archive: &Path,
    source: &Path,
    mut deploy: Command,
    observer: &dyn BuildObserver,
) -> Result<i32, DeployError> {
    let extract = Command::new("tar")
        .arg("xzf")
        .arg(archive)
        .arg("-C")
        .arg(source)
        .output()
        .await?;
    if !extract.status.success() {
        observer.append_output(&String::from_utf8_lossy(&extract.stderr));
        observer.append_output("Failed to extract archive\n");
        return Ok(extract.status.code().unwrap_or(-1));
    }

    let mut child = deploy.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = tokio::join!(pump_lines(stdout, observer), pump_lines(stderr, observer));
    if let Err(e) = out.and(err) {
        warn!("Lost part of the build output: {}", e);
    }

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(-1))
}

async fn pump_lines<R>(reader: Option<R>, observer: &dyn BuildObserver) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        observer.append_output(&format!("{}\n", line));
    }
    Ok(())
}
