//! Script build strategy for the sandbox family
//!
//! A shell script uploaded next to the archive does the whole build inside
//! the sandbox, run as the `build` service so the sandbox stays awake. The
//! script leaves a marker file once the real app service has replaced the
//! placeholder, or on the first failure; a watcher task polls for
//! it. Both markers carry the build id so leftovers from an earlier build
//! are never mistaken for the current one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BuildObserver, ServiceSpec};
use crate::deploy::runner::BuildStrategy;
use crate::deploy::transfer::StagedFile;
use crate::errors::DeployError;

pub const BUILD_SCRIPT_PATH: &str = "/tmp/build.sh";
pub const BUILD_SERVICE: &str = "build";
pub const COMPLETE_MARKER: &str = "/app/.build-complete";
pub const ERROR_MARKER: &str = "/app/.build-error";

const BUILD_SCRIPT: &str = r#"#!/bin/bash
# Usage: build.sh <build-id>
set -o pipefail
BUILD_ID="$1"

fail() {
  echo "$BUILD_ID $1" > /app/.build-error
  exit 1
}

rm -f /app/.build-complete /app/.build-error

# Placeholder app on port 3000 keeps the sandbox awake while building
sprite-env services stop app 2>/dev/null || true
sprite-env services delete app 2>/dev/null || true
sprite-env services create app \
  --cmd node --args "-e,require('http').createServer((q,r)=>{r.end('building')}).listen(3000)" \
  --http-port 3000 \
  --no-stream

mkdir -p /app
cd /app
tar xzf /tmp/app.tar.gz || fail "Failed to extract archive"

echo "==> Installing dependencies"
npm install 2>&1 | tee /app/build.log || fail "npm install failed"

echo "==> Building application"
npm run build 2>&1 | tee -a /app/build.log || fail "npm run build failed"

# Swap the placeholder for the real app
sprite-env services stop app 2>/dev/null || true
sprite-env services delete app 2>/dev/null || true
sprite-env services create app \
  --cmd bash --args "-c,cd /app && npm run start" \
  --http-port 3000 \
  --no-stream || fail "Failed to start the application service"

echo "$BUILD_ID" > /app/.build-complete
"#;

/// The build script run inside the sandbox
pub fn build_script() -> &'static str {
    BUILD_SCRIPT
}

#[derive(Debug, Clone)]
pub struct ScriptBuild {
    poll_interval: Duration,
    timeout: Duration,
}

impl ScriptBuild {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }
}

impl Default for ScriptBuild {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(20 * 60))
    }
}

#[async_trait]
impl BuildStrategy for ScriptBuild {
    fn name(&self) -> &'static str {
        "script"
    }

    fn staged_files(&self) -> Vec<StagedFile> {
        vec![StagedFile {
            path: BUILD_SCRIPT_PATH.to_string(),
            contents: BUILD_SCRIPT.as_bytes().to_vec(),
            mode: Some("0755".to_string()),
        }]
    }

    async fn launch(
        &self,
        backend: Arc<dyn Backend>,
        resource_name: &str,
        _secrets: &BTreeMap<String, String>,
        observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError> {
        // Leftovers from an earlier build; a missing service is fine
        if let Err(e) = backend.stop_service(resource_name, BUILD_SERVICE).await {
            debug!(resource = resource_name, "Could not stop previous build service: {}", e);
        }
        if let Err(e) = backend.delete_service(resource_name, BUILD_SERVICE).await {
            debug!(resource = resource_name, "Could not delete previous build service: {}", e);
        }

        let build_id = Utc::now().timestamp_millis().to_string();
        let spec = ServiceSpec {
            cmd: "bash".to_string(),
            args: vec![BUILD_SCRIPT_PATH.to_string(), build_id.clone()],
            http_port: None,
        };
        backend.put_service(resource_name, BUILD_SERVICE, &spec).await?;
        backend.start_service(resource_name, BUILD_SERVICE).await?;

        let watcher = BuildWatcher {
            backend,
            resource_name: resource_name.to_string(),
            build_id,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        };
        tokio::spawn(async move {
            let exit_code = watcher.run(observer.as_ref()).await;
            observer.complete(exit_code).await;
        });
        Ok(())
    }
}

/// Outcome read from the marker files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Complete,
    Failed(String),
}

/// Interpret the marker contents written by the script for `build_id`
pub fn read_marker(
    build_id: &str,
    complete: Option<&[u8]>,
    failed: Option<&[u8]>,
) -> Option<Marker> {
    if let Some(bytes) = complete {
        if String::from_utf8_lossy(bytes).trim() == build_id {
            return Some(Marker::Complete);
        }
    }
    if let Some(bytes) = failed {
        let text = String::from_utf8_lossy(bytes);
        let (id, message) = text.trim().split_once(' ').unwrap_or((text.trim(), ""));
        if id == build_id {
            return Some(Marker::Failed(message.trim().to_string()));
        }
    }
    None
}

struct BuildWatcher {
    backend: Arc<dyn Backend>,
    resource_name: String,
    build_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl BuildWatcher {
    /// Poll until a marker for this build shows up or the ceiling is hit
    async fn run(&self, observer: &dyn BuildObserver) -> i32 {
        let name = self.resource_name.as_str();
        let deadline = Instant::now() + self.timeout;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.backend.get_service_logs(name, BUILD_SERVICE).await {
                Ok(logs) if !logs.is_empty() => observer.replace_output(&logs),
                Ok(_) => {}
                Err(e) => debug!(resource = name, "Build logs unavailable: {}", e),
            }

            let complete = self.read(COMPLETE_MARKER).await;
            let failed = self.read(ERROR_MARKER).await;
            match read_marker(&self.build_id, complete.as_deref(), failed.as_deref()) {
                Some(Marker::Complete) => {
                    info!(resource = name, "Build script finished");
                    return 0;
                }
                Some(Marker::Failed(message)) => {
                    warn!(resource = name, "Build script failed: {}", message);
                    observer.append_output(&format!("\n{}\n", message));
                    return 1;
                }
                None => {}
            }

            if Instant::now() >= deadline {
                warn!(resource = name, "Build did not finish in {:?}", self.timeout);
                observer.append_output(&format!(
                    "\nBuild timed out after {} seconds\n",
                    self.timeout.as_secs()
                ));
                return -1;
            }
        }
    }

    /// Missing files and transient read errors both read as "not yet"
    async fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.backend.read_file(&self.resource_name, path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(resource = %self.resource_name, path, "Marker read failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_content() {
        let script = build_script();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("tar xzf /tmp/app.tar.gz"));
        assert!(script.contains("==> Installing dependencies"));
        assert!(script.contains("npm run build 2>&1 | tee -a /app/build.log"));
        assert!(script.contains("echo \"$BUILD_ID\" > /app/.build-complete"));
        assert!(script.contains("npm run start"));
    }

    #[test]
    fn test_complete_marker_follows_app_swap() {
        let script = build_script();
        let marker = script.find("> /app/.build-complete").unwrap();
        let app_start = script.find("npm run start").unwrap();
        assert!(marker > app_start);
        assert!(script[app_start..marker].contains("|| fail \""));
        assert!(script.trim_end().ends_with("echo \"$BUILD_ID\" > /app/.build-complete"));
    }

    #[test]
    fn test_staged_script_is_executable() {
        let files = ScriptBuild::default().staged_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, BUILD_SCRIPT_PATH);
        assert_eq!(files[0].mode.as_deref(), Some("0755"));
    }

    #[test]
    fn test_read_marker_matches_build_id() {
        assert_eq!(read_marker("42", Some(b"42\n"), None), Some(Marker::Complete));
        assert_eq!(read_marker("42", Some(b"41\n"), None), None);
        assert_eq!(
            read_marker("42", None, Some(b"42 npm install failed\n")),
            Some(Marker::Failed("npm install failed".to_string()))
        );
        assert_eq!(read_marker("42", None, Some(b"7 stale failure\n")), None);
        assert_eq!(read_marker("4", None, Some(b"42 other build\n")), None);
        assert_eq!(read_marker("42", None, None), None);
    }
}
