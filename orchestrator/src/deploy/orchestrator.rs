//! Deployment orchestrator
//!
//! Wires the provisioner, transfer, runner and reconciler around one backend,
//! one store and one build registry, and exposes the operations the HTTP
//! layer calls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_models::DeployEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::deploy::fsm::{AppStatus, StatusFsm};
use crate::deploy::liveness::LivenessProbe;
use crate::deploy::provisioner::Provisioner;
use crate::deploy::runner::{BuildRunner, BuildStrategy};
use crate::deploy::status::StatusReconciler;
use crate::deploy::tracker::BuildRegistry;
use crate::deploy::transfer::ArtifactTransfer;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentLogs, PreparedResource, StatusReport};
use crate::store::DeploymentStore;

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub resource_prefix: String,
    pub probe_timeout: Duration,
    pub stream_poll_interval: Duration,
    pub stream_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            resource_prefix: "shipyard".to_string(),
            probe_timeout: Duration::from_secs(3),
            stream_poll_interval: Duration::from_secs(3),
            stream_timeout: Duration::from_secs(10 * 60),
        }
    }
}

pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    store: Arc<dyn DeploymentStore>,
    registry: Arc<BuildRegistry>,
    provisioner: Provisioner,
    transfer: ArtifactTransfer,
    runner: BuildRunner,
    reconciler: StatusReconciler,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn DeploymentStore>,
        strategy: Arc<dyn BuildStrategy>,
        options: OrchestratorOptions,
    ) -> Result<Self, DeployError> {
        let registry = Arc::new(BuildRegistry::new());
        let probe = LivenessProbe::new(options.probe_timeout)?;

        Ok(Self {
            provisioner: Provisioner::new(backend.clone(), store.clone(), &options.resource_prefix),
            transfer: ArtifactTransfer::new(backend.clone(), store.clone()),
            runner: BuildRunner::new(backend.clone(), store.clone(), registry.clone(), strategy),
            reconciler: StatusReconciler::new(
                backend.clone(),
                store.clone(),
                registry.clone(),
                probe,
            ),
            backend,
            store,
            registry,
            options,
        })
    }

    pub async fn prepare(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<PreparedResource, DeployError> {
        self.provisioner.prepare(owner_id, application_name).await
    }

    /// Upload and start a build. Returns as soon as the build is running.
    pub async fn push(
        &self,
        owner_id: &str,
        application_name: &str,
        archive: &[u8],
        env_vars: &BTreeMap<String, String>,
    ) -> Result<AppStatus, DeployError> {
        if application_name.trim().is_empty() || archive.is_empty() {
            return Err(DeployError::Validation(
                "appName and archive are required".to_string(),
            ));
        }

        let deployment = self.transfer.resolve(owner_id, application_name).await?;
        let resource_name = deployment.resource_name.clone();

        // Refuse before uploading so a running build never sees its files change
        self.runner.ensure_idle(&resource_name)?;

        self.transfer
            .upload(&deployment, archive, env_vars, &self.runner.staged_files())
            .await?;
        let status = self.runner.start_build(&resource_name, env_vars).await?;

        info!(app = application_name, resource = %resource_name, "Push accepted");
        Ok(status)
    }

    pub async fn status(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<StatusReport, DeployError> {
        self.reconciler.status(owner_id, application_name).await
    }

    /// Build output plus best-effort runtime logs
    pub async fn logs(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<DeploymentLogs, DeployError> {
        let deployment = self
            .store
            .find(owner_id, application_name)
            .await?
            .filter(|d| d.has_resource())
            .ok_or_else(|| DeployError::NotFound("No deployment found".to_string()))?;

        let build_log = self
            .registry
            .get(&deployment.resource_name)
            .map(|entry| entry.output)
            .filter(|output| !output.is_empty());

        let service_logs = match self.backend.service_logs(&deployment.resource_name).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                debug!(resource = %deployment.resource_name, "No service logs: {}", e);
                None
            }
        };

        Ok(DeploymentLogs {
            build_log,
            service_logs,
        })
    }

    /// Prepare, push, then follow the status until the app runs or the build
    /// fails. Events arrive on the returned channel; it closes when done.
    pub fn deploy(
        self: &Arc<Self>,
        owner_id: &str,
        application_name: &str,
        archive: Vec<u8>,
        env_vars: BTreeMap<String, String>,
    ) -> mpsc::Receiver<DeployEvent> {
        let (tx, rx) = mpsc::channel(32);
        let orchestrator = self.clone();
        let owner_id = owner_id.to_string();
        let application_name = application_name.to_string();

        tokio::spawn(async move {
            let result = orchestrator
                .run_deploy(&tx, &owner_id, &application_name, &archive, &env_vars)
                .await;
            if let Err(e) = result {
                warn!(app = %application_name, "Streaming deploy failed: {}", e);
                let _ = tx
                    .send(DeployEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });
        rx
    }

    async fn run_deploy(
        &self,
        tx: &mpsc::Sender<DeployEvent>,
        owner_id: &str,
        application_name: &str,
        archive: &[u8],
        env_vars: &BTreeMap<String, String>,
    ) -> Result<(), DeployError> {
        let send = |step: &str, message: String| {
            tx.send(DeployEvent::Progress {
                step: step.to_string(),
                message,
            })
        };

        let _ = send("prepare", "Preparing resource...".to_string()).await;
        let prepared = self.prepare(owner_id, application_name).await?;

        let _ = send("push", format!("Uploading code to {}...", prepared.resource_name)).await;
        self.push(owner_id, application_name, archive, env_vars).await?;

        let _ = send("build", "Build started".to_string()).await;

        let mut fsm = StatusFsm::new();
        let mut last_message: Option<String> = None;
        let deadline = Instant::now() + self.options.stream_timeout;

        loop {
            tokio::time::sleep(self.options.stream_poll_interval).await;
            if tx.is_closed() {
                debug!(app = application_name, "Deploy stream closed by client");
                return Ok(());
            }

            match self.status(owner_id, application_name).await {
                Ok(report) => {
                    match fsm.observe(report.status) {
                        Ok(changed) => {
                            if changed || report.message != last_message {
                                let message = report
                                    .message
                                    .clone()
                                    .unwrap_or_else(|| report.status.to_string());
                                let _ = send(report.status.as_str(), message).await;
                                last_message = report.message.clone();
                            }
                        }
                        Err(e) => debug!(app = application_name, "Ignoring status: {}", e),
                    }

                    match report.status {
                        AppStatus::Running => {
                            let _ = tx.send(DeployEvent::Done { url: report.url }).await;
                            return Ok(());
                        }
                        AppStatus::BuildError => {
                            let message = report
                                .error
                                .unwrap_or_else(|| "Build failed".to_string());
                            let _ = tx.send(DeployEvent::Error { message }).await;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                Err(e) => warn!(app = application_name, "Status check failed: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(DeployError::Internal(format!(
                    "Timed out after {} seconds waiting for the deployment",
                    self.options.stream_timeout.as_secs()
                )));
            }
        }
    }
}
