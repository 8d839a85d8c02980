//! End-to-end deploys of the `acme` app against the mock backend

use std::collections::BTreeMap;
use std::time::Duration;

use api_models::DeployEvent;
use axum::http::StatusCode;
use shipyard::backend::{BackendFamily, InstanceState, ARCHIVE_PATH, ENV_PATH};
use shipyard::deploy::fsm::AppStatus;
use shipyard::deploy::orchestrator::Orchestrator;
use shipyard::deploy::script_build::{
    build_script, BUILD_SCRIPT_PATH, BUILD_SERVICE, COMPLETE_MARKER, ERROR_MARKER,
};
use shipyard::errors::DeployError;
use shipyard::models::deployment::StatusReport;

use crate::common::{harness, spawn_app};

const OWNER: &str = "u1";
const APP: &str = "acme";

fn env_vars() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PORT".to_string(), "3000".to_string());
    env.insert("API_KEY".to_string(), "abc".to_string());
    env
}

/// Poll until the status leaves `building`
async fn settle(orchestrator: &Orchestrator) -> StatusReport {
    for _ in 0..200 {
        let report = orchestrator.status(OWNER, APP).await.unwrap();
        if report.status != AppStatus::Building {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("build never finished");
}

#[tokio::test]
async fn test_acme_platform_deploy() {
    let h = harness(BackendFamily::Platform);
    let app_url = spawn_app(StatusCode::OK).await;
    h.backend.set_resource_url(&app_url);

    assert_eq!(
        h.orchestrator.status(OWNER, APP).await.unwrap().status,
        AppStatus::NotFound
    );

    let prepared = h.orchestrator.prepare(OWNER, APP).await.unwrap();
    assert_eq!(prepared.resource_name, "shipyard-1");
    assert_eq!(prepared.resource_url, app_url);
    assert_eq!(
        h.orchestrator.status(OWNER, APP).await.unwrap().status,
        AppStatus::Preparing
    );

    let status = h
        .orchestrator
        .push(OWNER, APP, b"tarball", &env_vars())
        .await
        .unwrap();
    assert_eq!(status, AppStatus::Building);

    // Everything landed on the resource
    assert_eq!(h.backend.file("shipyard-1", ARCHIVE_PATH).unwrap(), b"tarball");
    assert_eq!(
        h.backend.file("shipyard-1", ENV_PATH).unwrap(),
        b"API_KEY=abc\nPORT=3000"
    );
    assert_eq!(h.backend.imported_secrets("shipyard-1"), Some(env_vars()));

    // A second push while building is refused
    let err = h
        .orchestrator
        .push(OWNER, APP, b"tarball-2", &env_vars())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Conflict(_)));
    assert_eq!(h.backend.file("shipyard-1", ARCHIVE_PATH).unwrap(), b"tarball");

    let report = h.orchestrator.status(OWNER, APP).await.unwrap();
    assert_eq!(report.status, AppStatus::Building);
    assert_eq!(report.message.as_deref(), Some("Building..."));

    assert!(
        h.backend
            .complete_build(
                "shipyard-1",
                0,
                "#7 [build 2/3] RUN npm run build\nPushing image to registry\n"
            )
            .await
    );

    // Deployed but no machine yet
    assert_eq!(settle(&h.orchestrator).await.status, AppStatus::Starting);

    h.backend.set_instance_state("shipyard-1", InstanceState::Running);
    let report = h.orchestrator.status(OWNER, APP).await.unwrap();
    assert_eq!(report.status, AppStatus::Running);
    assert_eq!(report.url.as_deref(), Some(app_url.as_str()));

    let logs = h.orchestrator.logs(OWNER, APP).await.unwrap();
    assert!(logs.build_log.unwrap().contains("RUN npm run build"));
    assert_eq!(logs.service_logs, None);

    // Re-preparing a live resource changes nothing upstream
    let mutating = h.backend.mutating_calls();
    let again = h.orchestrator.prepare(OWNER, APP).await.unwrap();
    assert_eq!(again, prepared);
    assert_eq!(h.backend.mutating_calls(), mutating);
}

#[tokio::test]
async fn test_acme_platform_build_failure() {
    let h = harness(BackendFamily::Platform);
    h.orchestrator.prepare(OWNER, APP).await.unwrap();
    h.orchestrator
        .push(OWNER, APP, b"tarball", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(h.backend.file("shipyard-1", ENV_PATH), None);

    h.backend
        .complete_build("shipyard-1", 1, "npm ERR! Missing script: \"build\"\n")
        .await;

    let report = settle(&h.orchestrator).await;
    assert_eq!(report.status, AppStatus::BuildError);
    assert!(report.error.unwrap().contains("Missing script"));

    // The failed build no longer blocks a new one
    let status = h
        .orchestrator
        .push(OWNER, APP, b"tarball", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(status, AppStatus::Building);
}

#[tokio::test]
async fn test_acme_sandbox_deploy() {
    let h = harness(BackendFamily::Sandbox);
    let app_url = spawn_app(StatusCode::OK).await;
    h.backend.set_resource_url(&app_url);

    h.orchestrator.prepare(OWNER, APP).await.unwrap();
    h.orchestrator
        .push(OWNER, APP, b"tarball", &env_vars())
        .await
        .unwrap();
    assert!(h.backend.wake_calls() >= 1);

    let script = h.backend.file("shipyard-1", BUILD_SCRIPT_PATH).unwrap();
    assert_eq!(script, build_script().as_bytes());

    // The build service runs the staged script with this build's id
    let service = h.backend.service("shipyard-1", BUILD_SERVICE).unwrap();
    assert_eq!(service.cmd, "bash");
    assert_eq!(service.args[0], BUILD_SCRIPT_PATH);
    let build_id = service.args[1].clone();

    h.backend.set_named_service_logs(
        "shipyard-1",
        BUILD_SERVICE,
        "==> Installing dependencies\nadded 120 packages\n",
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = h.orchestrator.status(OWNER, APP).await.unwrap();
    assert_eq!(report.status, AppStatus::Building);
    assert_eq!(report.message.as_deref(), Some("Installing dependencies..."));

    // A marker from some earlier build is ignored
    h.backend
        .put_file("shipyard-1", ERROR_MARKER, b"1 npm install failed\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.orchestrator.status(OWNER, APP).await.unwrap().status,
        AppStatus::Building
    );

    h.backend.put_file(
        "shipyard-1",
        COMPLETE_MARKER,
        format!("{}\n", build_id).as_bytes(),
    );
    h.backend.set_instance_state("shipyard-1", InstanceState::Running);

    let report = settle(&h.orchestrator).await;
    assert_eq!(report.status, AppStatus::Running);
}

#[tokio::test]
async fn test_acme_sandbox_build_error_marker() {
    let h = harness(BackendFamily::Sandbox);
    h.orchestrator.prepare(OWNER, APP).await.unwrap();
    h.orchestrator
        .push(OWNER, APP, b"tarball", &BTreeMap::new())
        .await
        .unwrap();

    let build_id = h.backend.service("shipyard-1", BUILD_SERVICE).unwrap().args[1].clone();
    h.backend.put_file(
        "shipyard-1",
        ERROR_MARKER,
        format!("{} npm run build failed\n", build_id).as_bytes(),
    );

    let report = settle(&h.orchestrator).await;
    assert_eq!(report.status, AppStatus::BuildError);
    assert!(report.error.unwrap().contains("npm run build failed"));
}

#[tokio::test]
async fn test_push_requires_prepare() {
    let h = harness(BackendFamily::Platform);
    let err = h
        .orchestrator
        .push(OWNER, APP, b"tarball", &BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));

    let err = h
        .orchestrator
        .push(OWNER, APP, b"", &BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Validation(_)));

    assert!(matches!(
        h.orchestrator.logs(OWNER, APP).await,
        Err(DeployError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_streaming_deploy_reaches_done() {
    let h = harness(BackendFamily::Platform);
    let app_url = spawn_app(StatusCode::OK).await;
    h.backend.set_resource_url(&app_url);
    h.backend.set_instance_state("shipyard-1", InstanceState::Running);

    let backend = h.backend.clone();
    tokio::spawn(async move {
        for _ in 0..500 {
            if backend.complete_build("shipyard-1", 0, "Creating release\n").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let mut events = h
        .orchestrator
        .deploy(OWNER, APP, b"tarball".to_vec(), BTreeMap::new());
    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }

    assert!(matches!(
        received.first(),
        Some(DeployEvent::Progress { step, .. }) if step == "prepare"
    ));
    assert_eq!(
        received.last(),
        Some(&DeployEvent::Done {
            url: Some(app_url.clone())
        })
    );
}

#[tokio::test]
async fn test_streaming_deploy_reports_build_failure() {
    let h = harness(BackendFamily::Platform);

    let backend = h.backend.clone();
    tokio::spawn(async move {
        for _ in 0..500 {
            if backend.complete_build("shipyard-1", 2, "error: out of memory\n").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let mut events = h
        .orchestrator
        .deploy(OWNER, APP, b"tarball".to_vec(), BTreeMap::new());
    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }

    match last {
        Some(DeployEvent::Error { message }) => assert!(message.contains("out of memory")),
        other => panic!("unexpected final event: {:?}", other),
    }
}
