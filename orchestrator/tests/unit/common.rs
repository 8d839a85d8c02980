//! Shared fixtures

use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use shipyard::backend::mock::MockBackend;
use shipyard::backend::BackendFamily;
use shipyard::deploy::image_build::ImageBuild;
use shipyard::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use shipyard::deploy::runner::BuildStrategy;
use shipyard::deploy::script_build::ScriptBuild;
use shipyard::store::MemoryStore;
use tokio::net::TcpListener;

/// Serve `status` for every GET on a random local port and return its URL
pub async fn spawn_app(status: StatusCode) -> String {
    let app = Router::new().route("/", get(move || async move { (status, "ok") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        resource_prefix: "shipyard".to_string(),
        probe_timeout: Duration::from_secs(1),
        stream_poll_interval: Duration::from_millis(20),
        stream_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<MockBackend>,
}

/// Orchestrator over a mock backend, paired with the family's build strategy
pub fn harness(family: BackendFamily) -> Harness {
    let backend = Arc::new(MockBackend::new(family));
    let store = Arc::new(MemoryStore::new());
    let strategy: Arc<dyn BuildStrategy> = match family {
        BackendFamily::Sandbox => Arc::new(ScriptBuild::new(
            Duration::from_millis(10),
            Duration::from_secs(5),
        )),
        BackendFamily::Platform => Arc::new(ImageBuild),
    };
    let orchestrator =
        Orchestrator::new(backend.clone(), store, strategy, fast_options()).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        backend,
    }
}
