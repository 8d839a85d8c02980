//! Sandbox backend adapter
//!
//! Talks to the sandboxed-container REST API. Every resource is a named
//! sandbox with its own filesystem and a small service supervisor; builds run
//! as a service inside it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::retry::{ensure_success, is_transient, with_retry, RetryPolicy};
use crate::backend::{
    Backend, BackendFamily, InstanceState, ProvisionOutcome, ResourceInfo, RuntimeInstance,
    ServiceInfo, ServiceSpec,
};
use crate::errors::DeployError;

/// Service that runs the deployed application inside the sandbox
pub const APP_SERVICE: &str = "app";

/// Wake loop settings
#[derive(Debug, Clone)]
pub struct WakePolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub delay: Duration,
}

impl Default for WakePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(10),
            delay: Duration::from_secs(3),
        }
    }
}

/// Sandbox REST API client
pub struct SandboxBackend {
    client: Client,
    base: Url,
    token: SecretString,
    retry: RetryPolicy,
    wake: WakePolicy,
    logs_timeout: Duration,
}

impl SandboxBackend {
    pub fn new(
        api_base: &str,
        token: SecretString,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let base = Url::parse(api_base)
            .map_err(|e| DeployError::Config(format!("Invalid sandbox API base {}: {}", api_base, e)))?;
        if base.cannot_be_a_base() {
            return Err(DeployError::Config(format!(
                "Sandbox API base cannot carry a path: {}",
                api_base
            )));
        }

        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base,
            token,
            retry,
            wake: WakePolicy::default(),
            logs_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_wake_policy(mut self, wake: WakePolicy) -> Self {
        self.wake = wake;
        self
    }

    /// Build `<base>/v1/sprites/<segments...>`, percent-encoding each segment
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, DeployError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DeployError::Config("Sandbox API base cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("v1")
            .push("sprites")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    /// Send with the transient-error retry loop. `build` is invoked once per attempt.
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
}

#[async_trait]
impl Backend for SandboxBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Sandbox
    }

    async fn provision(&self, name: &str) -> Result<ProvisionOutcome, DeployError> {
        let url = self.endpoint(&[])?;
        let body = json!({ "name": name, "wait_for_capacity": true });
        let response = self
            .send("create_sprite", || {
                self.request(Method::POST, url.clone()).json(&body)
            })
            .await?;

        let status = response.status().as_u16();
        if status == 409 {
            return Ok(ProvisionOutcome::AlreadyExists);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.contains("already exists") {
                return Ok(ProvisionOutcome::AlreadyExists);
            }
            return Err(DeployError::from_upstream(status, text));
        }

        let info: ResourceInfo = response.json().await?;
        info!(sprite = %info.name, "Created sprite");
        Ok(ProvisionOutcome::Created(info))
    }

    async fn get(&self, name: &str) -> Result<Option<ResourceInfo>, DeployError> {
        let url = self.endpoint(&[name])?;
        let response = self
            .send("get_sprite", || self.request(Method::GET, url.clone()))
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn set_public(&self, name: &str) -> Result<(), DeployError> {
        let url = self.endpoint(&[name])?;
        let body = json!({ "url_settings": { "auth": "public" } });
        let response = self
            .send("update_sprite", || {
                self.request(Method::PUT, url.clone()).json(&body)
            })
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn write_file(
        &self,
        name: &str,
        path: &str,
        data: &[u8],
        mode: Option<&str>,
    ) -> Result<(), DeployError> {
        let mut url = self.endpoint(&[name, "fs", "write"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("path", path).append_pair("mkdir", "true");
            if let Some(mode) = mode {
                query.append_pair("mode", mode);
            }
        }

        debug!(sprite = name, path, bytes = data.len(), "Writing file");
        let response = self
            .send("write_file", || {
                self.request(Method::PUT, url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn read_file(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, DeployError> {
        let mut url = self.endpoint(&[name, "fs", "read"])?;
        url.query_pairs_mut().append_pair("path", path);

        let response = self
            .send("read_file", || self.request(Method::GET, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn wake(&self, name: &str) {
        // Listing exec sessions is the cheapest call that wakes a hibernating sprite
        let url = match self.endpoint(&[name, "exec"]) {
            Ok(url) => url,
            Err(e) => {
                warn!(sprite = name, "Skipping wake: {}", e);
                return;
            }
        };

        for attempt in 1..=self.wake.max_attempts {
            let result = self
                .request(Method::GET, url.clone())
                .timeout(self.wake.attempt_timeout)
                .send()
                .await;
            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    debug!(sprite = name, attempt, status, "Wake attempt");
                    if !is_transient(status) {
                        return;
                    }
                }
                Err(e) => debug!(sprite = name, attempt, "Wake attempt failed: {}", e),
            }
            tokio::time::sleep(self.wake.delay).await;
        }

        warn!(
            sprite = name,
            attempts = self.wake.max_attempts,
            "Sprite did not wake, proceeding anyway"
        );
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<RuntimeInstance>, DeployError> {
        // A sprite is its own single runtime instance
        Ok(self
            .get(name)
            .await?
            .map(|info| RuntimeInstance {
                state: sprite_state(&info.status),
                id: info.name,
            })
            .into_iter()
            .collect())
    }

    async fn service_logs(&self, name: &str) -> Result<String, DeployError> {
        self.get_service_logs(name, APP_SERVICE).await
    }

    async fn put_service(
        &self,
        name: &str,
        service: &str,
        spec: &ServiceSpec,
    ) -> Result<(), DeployError> {
        let url = self.endpoint(&[name, "services", service])?;
        let response = self
            .send("put_service", || {
                self.request(Method::PUT, url.clone()).json(spec)
            })
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn start_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        let url = self.endpoint(&[name, "services", service, "start"])?;
        let response = self
            .send("start_service", || self.request(Method::POST, url.clone()))
            .await?;
        // The body is a progress stream; dropping it leaves the service running
        ensure_success(response).await?;
        info!(sprite = name, service, "Started service");
        Ok(())
    }

    async fn stop_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        let url = self.endpoint(&[name, "services", service, "stop"])?;
        let response = self
            .send("stop_service", || self.request(Method::POST, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        let url = self.endpoint(&[name, "services", service])?;
        let response = self
            .send("delete_service", || self.request(Method::DELETE, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn get_service(
        &self,
        name: &str,
        service: &str,
    ) -> Result<Option<ServiceInfo>, DeployError> {
        let url = self.endpoint(&[name, "services", service])?;
        let response = self
            .send("get_service", || self.request(Method::GET, url.clone()))
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn get_service_logs(&self, name: &str, service: &str) -> Result<String, DeployError> {
        let url = self.endpoint(&[name, "services", service, "logs"])?;
        let response = self
            .send("get_service_logs", || {
                self.request(Method::GET, url.clone())
                    .timeout(self.logs_timeout)
            })
            .await?;
        let response = ensure_success(response).await?;
        let text = response.text().await?;
        Ok(parse_ndjson_logs(&text))
    }
}

/// Map the sprite's own status onto an instance state
pub fn sprite_state(status: &str) -> InstanceState {
    match status {
        "cold" => InstanceState::Stopped,
        "warm" | "running" => InstanceState::Running,
        other => InstanceState::parse(other),
    }
}

#[derive(Debug, Deserialize)]
struct LogEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// Flatten a service log stream into plain text.
///
/// Keeps the `data` of `stdout`/`stderr` events, drops other events and
/// passes non-JSON lines through untouched.
pub fn parse_ndjson_logs(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogEvent>(line) {
            Ok(event) => match event.kind.as_deref() {
                Some("stdout") | Some("stderr") => event.data.filter(|d| !d.is_empty()),
                _ => None,
            },
            Err(_) => Some(line.to_string()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response as AxumResponse},
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    /// Fake sprites API: answers 503 until `failures` runs out
    #[derive(Default)]
    struct FakeApi {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FakeApi {
        fn hit(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    async fn create_sprite(Json(body): Json<serde_json::Value>) -> AxumResponse {
        match body["name"].as_str() {
            Some("taken") => StatusCode::CONFLICT.into_response(),
            Some("dup") => (StatusCode::BAD_REQUEST, "sprite already exists").into_response(),
            Some("bad") => (StatusCode::BAD_REQUEST, "invalid name").into_response(),
            Some(name) => (
                StatusCode::CREATED,
                Json(json!({ "name": name, "url": "https://app.sprites.test", "status": "cold" })),
            )
                .into_response(),
            None => StatusCode::BAD_REQUEST.into_response(),
        }
    }

    async fn get_sprite(State(api): State<Arc<FakeApi>>, Path(name): Path<String>) -> AxumResponse {
        if api.hit() {
            return (StatusCode::SERVICE_UNAVAILABLE, "waking").into_response();
        }
        if name == "missing" {
            return StatusCode::NOT_FOUND.into_response();
        }
        Json(json!({ "name": name, "status": "warm" })).into_response()
    }

    async fn exec(State(api): State<Arc<FakeApi>>) -> StatusCode {
        if api.hit() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::OK
        }
    }

    async fn spawn_api(failures: u32) -> (Arc<FakeApi>, SandboxBackend) {
        let api = Arc::new(FakeApi {
            failures: AtomicU32::new(failures),
            ..Default::default()
        });
        let app = Router::new()
            .route("/v1/sprites", post(create_sprite))
            .route("/v1/sprites/{name}", get(get_sprite))
            .route("/v1/sprites/{name}/exec", get(exec))
            .route("/v1/sprites/{name}/fs/read", get(|| async { StatusCode::NOT_FOUND }))
            .with_state(api.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let backend = SandboxBackend::new(
            &format!("http://{}", addr),
            SecretString::from("token".to_string()),
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::ZERO,
            },
            Duration::from_secs(5),
        )
        .unwrap()
        .with_wake_policy(WakePolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(1),
            delay: Duration::ZERO,
        });
        (api, backend)
    }

    #[tokio::test]
    async fn test_provision_conflicts_are_already_exists() {
        let (_api, backend) = spawn_api(0).await;
        assert_eq!(
            backend.provision("taken").await.unwrap(),
            ProvisionOutcome::AlreadyExists
        );
        assert_eq!(
            backend.provision("dup").await.unwrap(),
            ProvisionOutcome::AlreadyExists
        );
        assert!(matches!(
            backend.provision("bad").await,
            Err(DeployError::Upstream { status: 400, .. })
        ));

        match backend.provision("fresh").await.unwrap() {
            ProvisionOutcome::Created(info) => {
                assert_eq!(info.name, "fresh");
                assert_eq!(info.url.as_deref(), Some("https://app.sprites.test"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_maps_to_none() {
        let (_api, backend) = spawn_api(0).await;
        assert_eq!(backend.get("missing").await.unwrap(), None);
        assert_eq!(backend.read_file("app", "/app/.build-complete").await.unwrap(), None);
        assert!(backend.list_instances("missing").await.unwrap().is_empty());

        let instances = backend.list_instances("app").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "app");
        assert_eq!(instances[0].state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_get_retries_transient_responses() {
        let (api, backend) = spawn_api(4).await;
        let info = backend.get("app").await.unwrap().unwrap();
        assert_eq!(info.status, "warm");
        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_get_gives_up_after_max_attempts() {
        let (api, backend) = spawn_api(5).await;
        match backend.get("app").await {
            Err(DeployError::UpstreamTransient { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "waking");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_wake_stops_once_the_sprite_answers() {
        let (api, backend) = spawn_api(1).await;
        backend.wake("app").await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wake_proceeds_after_exhausting_attempts() {
        let (api, backend) = spawn_api(100).await;
        backend.wake("app").await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    fn backend() -> SandboxBackend {
        SandboxBackend::new(
            "https://api.example.test",
            SecretString::from("token".to_string()),
            RetryPolicy::default(),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_ndjson_logs() {
        let raw = r#"{"type":"stdout","data":"listening on 3000"}
{"type":"exit","code":0}
plain text line

{"type":"stderr","data":"warn: slow"}
{"type":"stdout","data":""}"#;
        assert_eq!(
            parse_ndjson_logs(raw),
            "listening on 3000\nplain text line\nwarn: slow"
        );
    }

    #[test]
    fn test_sprite_state() {
        assert_eq!(sprite_state("cold"), InstanceState::Stopped);
        assert_eq!(sprite_state("warm"), InstanceState::Running);
        assert_eq!(sprite_state("running"), InstanceState::Running);
        assert_eq!(
            sprite_state("provisioning"),
            InstanceState::Other("provisioning".to_string())
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = backend().endpoint(&["my app", "fs", "write"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/sprites/my%20app/fs/write"
        );
        assert_eq!(
            backend().endpoint(&[]).unwrap().as_str(),
            "https://api.example.test/v1/sprites"
        );
    }

    #[test]
    fn test_rejects_bad_base() {
        let result = SandboxBackend::new(
            "not a url",
            SecretString::from("token".to_string()),
            RetryPolicy::default(),
            Duration::from_secs(60),
        );
        assert!(matches!(result, Err(DeployError::Config(_))));
    }
}
