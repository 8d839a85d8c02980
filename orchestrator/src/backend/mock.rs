//! Scriptable in-process backend
//!
//! Keeps resources, files, services and instances in memory and records
//! every call so tests can assert on what the orchestrator did. Builds
//! launched through `start_build_and_deploy` stay pending until the test
//! calls [`MockBackend::complete_build`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::backend::{
    Backend, BackendFamily, BuildObserver, InstanceState, ProvisionOutcome, ResourceInfo,
    RuntimeInstance, ServiceInfo, ServiceSpec, ServiceState,
};
use crate::errors::DeployError;

pub struct MockBackend {
    family: BackendFamily,
    resource_url: RwLock<Option<String>>,
    resources: RwLock<HashMap<String, ResourceInfo>>,
    files: RwLock<HashMap<(String, String), Vec<u8>>>,
    services: RwLock<HashMap<(String, String), ServiceInfo>>,
    instances: RwLock<HashMap<String, Vec<RuntimeInstance>>>,
    observers: RwLock<HashMap<String, Arc<dyn BuildObserver>>>,
    secrets: RwLock<HashMap<String, BTreeMap<String, String>>>,
    logs: RwLock<HashMap<String, String>>,
    provision_calls: AtomicUsize,
    mutating_calls: AtomicUsize,
    wake_calls: AtomicUsize,
    fail_launch: AtomicBool,
    fail_queries: AtomicBool,
}

impl MockBackend {
    pub fn new(family: BackendFamily) -> Self {
        Self {
            family,
            resource_url: RwLock::new(None),
            resources: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            secrets: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            provision_calls: AtomicUsize::new(0),
            mutating_calls: AtomicUsize::new(0),
            wake_calls: AtomicUsize::new(0),
            fail_launch: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    /// URL reported for every resource created from now on
    pub fn set_resource_url(&self, url: &str) {
        *self.resource_url.write().unwrap_or_else(|e| e.into_inner()) = Some(url.to_string());
    }

    pub fn set_instances(&self, name: &str, instances: Vec<RuntimeInstance>) {
        self.instances
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), instances);
    }

    /// Shortcut for a single instance in `state`
    pub fn set_instance_state(&self, name: &str, state: InstanceState) {
        self.set_instances(
            name,
            vec![RuntimeInstance {
                id: format!("{}-0", name),
                state,
            }],
        );
    }

    pub fn set_service_logs(&self, name: &str, logs: &str) {
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), logs.to_string());
    }

    /// Logs returned by `get_service_logs` for one named service
    pub fn set_named_service_logs(&self, name: &str, service: &str, logs: &str) {
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(format!("{}/{}", name, service), logs.to_string());
    }

    /// Make the next build launches fail
    pub fn fail_launches(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Make runtime instance listing fail
    pub fn fail_runtime_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Drop a resource as if it was deleted out of band
    pub fn remove_resource(&self, name: &str) {
        self.resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    pub fn put_file(&self, name: &str, path: &str, data: &[u8]) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((name.to_string(), path.to_string()), data.to_vec());
    }

    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(name.to_string(), path.to_string()))
            .cloned()
    }

    pub fn service(&self, name: &str, service: &str) -> Option<ServiceInfo> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(name.to_string(), service.to_string()))
            .cloned()
    }

    pub fn imported_secrets(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.secrets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    /// Create and ingress calls, the only ones that change remote state
    pub fn mutating_calls(&self) -> usize {
        self.mutating_calls.load(Ordering::SeqCst)
    }

    pub fn wake_calls(&self) -> usize {
        self.wake_calls.load(Ordering::SeqCst)
    }

    /// Whether a build for `name` is waiting on [`MockBackend::complete_build`]
    pub fn has_pending_build(&self, name: &str) -> bool {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Finish a pending build with the given output and exit code
    pub async fn complete_build(&self, name: &str, exit_code: i32, output: &str) -> bool {
        let observer = self
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        match observer {
            Some(observer) => {
                observer.append_output(output);
                observer.complete(exit_code).await;
                true
            }
            None => false,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(BackendFamily::Platform)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn family(&self) -> BackendFamily {
        self.family
    }

    async fn provision(&self, name: &str) -> Result<ProvisionOutcome, DeployError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);

        let mut resources = self.resources.write().unwrap_or_else(|e| e.into_inner());
        if resources.contains_key(name) {
            return Ok(ProvisionOutcome::AlreadyExists);
        }
        let url = self
            .resource_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| format!("https://{}.mock.test", name));
        let info = ResourceInfo {
            name: name.to_string(),
            url: Some(url),
            status: "cold".to_string(),
        };
        resources.insert(name.to_string(), info.clone());
        Ok(ProvisionOutcome::Created(info))
    }

    async fn get(&self, name: &str) -> Result<Option<ResourceInfo>, DeployError> {
        Ok(self
            .resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    async fn set_public(&self, name: &str) -> Result<(), DeployError> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        if self.get(name).await?.is_none() {
            return Err(DeployError::Upstream {
                status: 404,
                body: format!("{} not found", name),
            });
        }
        Ok(())
    }

    async fn write_file(
        &self,
        name: &str,
        path: &str,
        data: &[u8],
        _mode: Option<&str>,
    ) -> Result<(), DeployError> {
        self.put_file(name, path, data);
        Ok(())
    }

    async fn read_file(&self, name: &str, path: &str) -> Result<Option<Vec<u8>>, DeployError> {
        Ok(self.file(name, path))
    }

    async fn wake(&self, _name: &str) {
        self.wake_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn import_secrets(
        &self,
        name: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), DeployError> {
        self.secrets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), secrets.clone());
        Ok(())
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<RuntimeInstance>, DeployError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DeployError::UpstreamTransient {
                status: 503,
                body: "machines unavailable".to_string(),
            });
        }
        Ok(self
            .instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn service_logs(&self, name: &str) -> Result<String, DeployError> {
        self.logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("no logs for {}", name)))
    }

    async fn put_service(
        &self,
        name: &str,
        service: &str,
        spec: &ServiceSpec,
    ) -> Result<(), DeployError> {
        self.services.write().unwrap_or_else(|e| e.into_inner()).insert(
            (name.to_string(), service.to_string()),
            ServiceInfo {
                name: service.to_string(),
                cmd: spec.cmd.clone(),
                args: spec.args.clone(),
                state: Some(ServiceState {
                    status: "stopped".to_string(),
                    pid: None,
                }),
            },
        );
        Ok(())
    }

    async fn start_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(DeployError::Upstream {
                status: 500,
                body: "service failed to start".to_string(),
            });
        }
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        match services.get_mut(&(name.to_string(), service.to_string())) {
            Some(info) => {
                info.state = Some(ServiceState {
                    status: "running".to_string(),
                    pid: Some(1),
                });
                Ok(())
            }
            None => Err(DeployError::Upstream {
                status: 404,
                body: format!("service {} not found", service),
            }),
        }
    }

    async fn stop_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        if let Some(info) = self
            .services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&(name.to_string(), service.to_string()))
        {
            info.state = Some(ServiceState {
                status: "stopped".to_string(),
                pid: None,
            });
        }
        Ok(())
    }

    async fn delete_service(&self, name: &str, service: &str) -> Result<(), DeployError> {
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(name.to_string(), service.to_string()));
        Ok(())
    }

    async fn get_service(
        &self,
        name: &str,
        service: &str,
    ) -> Result<Option<ServiceInfo>, DeployError> {
        Ok(self.service(name, service))
    }

    async fn get_service_logs(&self, name: &str, service: &str) -> Result<String, DeployError> {
        self.logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&format!("{}/{}", name, service))
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("no logs for {}/{}", name, service)))
    }

    async fn start_build_and_deploy(
        &self,
        name: &str,
        _source_dir: &str,
        _secrets: &BTreeMap<String, String>,
        observer: Arc<dyn BuildObserver>,
    ) -> Result<(), DeployError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(DeployError::Internal("failed to launch build".to_string()));
        }
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), observer);
        Ok(())
    }
}
