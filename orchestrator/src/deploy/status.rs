//! Status reconciliation
//!
//! Folds the build tracker, the persisted row and the backend's runtime view
//! into one externally visible status. Checked in priority order:
//!
//! 1. no row or no resource: `not_found`
//! 2. live build: `building` with a progress message
//! 3. persisted `error`: `build_error`
//! 4. persisted `building` without a live build (e.g. after a restart): `building`
//! 5. persisted `deployed`/`idle`: runtime instances plus a liveness probe
//! 6. anything else, or a failed backend query: the persisted status as is

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Backend, InstanceState};
use crate::deploy::fsm::AppStatus;
use crate::deploy::liveness::{Liveness, LivenessProbe};
use crate::deploy::progress::parse_build_step;
use crate::deploy::tracker::BuildRegistry;
use crate::errors::DeployError;
use crate::models::deployment::{DeployStatus, Deployment, StatusReport};
use crate::store::DeploymentStore;

pub struct StatusReconciler {
    backend: Arc<dyn Backend>,
    store: Arc<dyn DeploymentStore>,
    registry: Arc<BuildRegistry>,
    probe: LivenessProbe,
}

impl StatusReconciler {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn DeploymentStore>,
        registry: Arc<BuildRegistry>,
        probe: LivenessProbe,
    ) -> Self {
        Self {
            backend,
            store,
            registry,
            probe,
        }
    }

    pub async fn status(
        &self,
        owner_id: &str,
        application_name: &str,
    ) -> Result<StatusReport, DeployError> {
        let Some(deployment) = self.store.find(owner_id, application_name).await? else {
            return Ok(StatusReport::not_found());
        };
        if !deployment.has_resource() {
            return Ok(StatusReport::not_found());
        }
        let url = deployment.url();

        if let Some(entry) = self
            .registry
            .get(&deployment.resource_name)
            .filter(|entry| entry.is_running())
        {
            let message = parse_build_step(&entry.output);
            debug!(app = application_name, %message, "Build in progress");
            return Ok(StatusReport::new(AppStatus::Building, url).with_message(message));
        }

        match deployment.deploy_status {
            DeployStatus::Error => Ok(StatusReport::new(AppStatus::BuildError, url)
                .with_error(deployment.deploy_error.clone())),
            DeployStatus::Building => Ok(StatusReport::new(AppStatus::Building, url)),
            DeployStatus::Deployed | DeployStatus::Idle => {
                match self.runtime_status(&deployment).await {
                    Ok(status) => Ok(StatusReport::new(status, url)),
                    Err(e) => {
                        warn!(
                            app = application_name,
                            resource = %deployment.resource_name,
                            "Runtime check failed: {}",
                            e
                        );
                        Ok(StatusReport::new(deployment.deploy_status.into(), url))
                    }
                }
            }
            DeployStatus::Preparing => Ok(StatusReport::new(AppStatus::Preparing, url)),
        }
    }

    async fn runtime_status(&self, deployment: &Deployment) -> Result<AppStatus, DeployError> {
        let instances = self.backend.list_instances(&deployment.resource_name).await?;
        let Some(instance) = instances.first() else {
            debug!(resource = %deployment.resource_name, "No runtime instances yet");
            return Ok(AppStatus::Starting);
        };

        debug!(
            resource = %deployment.resource_name,
            instance = %instance.id,
            state = ?instance.state,
            "Runtime instance"
        );
        match instance.state {
            InstanceState::Running => match self.probe.check(&deployment.resource_url).await {
                Liveness::Responding => Ok(AppStatus::Running),
                Liveness::NotResponding => Ok(AppStatus::Starting),
            },
            InstanceState::Stopped => {
                // A request is what brings an auto-stopped runtime back
                self.probe.fire_and_forget(&deployment.resource_url);
                Ok(AppStatus::Starting)
            }
            InstanceState::Other(_) => Ok(AppStatus::Starting),
        }
    }
}
