//! Liveness probe classification against real local listeners

use std::time::Duration;

use axum::http::StatusCode;
use shipyard::deploy::liveness::{Liveness, LivenessProbe};

use crate::common::spawn_app;

#[tokio::test]
async fn test_client_errors_count_as_responding() {
    let probe = LivenessProbe::new(Duration::from_secs(1)).unwrap();

    let ok = spawn_app(StatusCode::OK).await;
    assert_eq!(probe.check(&ok).await, Liveness::Responding);

    // The app is up even if it has no route for "/"
    let not_found = spawn_app(StatusCode::NOT_FOUND).await;
    assert_eq!(probe.check(&not_found).await, Liveness::Responding);
}

#[tokio::test]
async fn test_server_errors_and_refusals_do_not() {
    let probe = LivenessProbe::new(Duration::from_secs(1)).unwrap();

    let broken = spawn_app(StatusCode::BAD_GATEWAY).await;
    assert_eq!(probe.check(&broken).await, Liveness::NotResponding);

    assert_eq!(probe.check("http://127.0.0.1:9").await, Liveness::NotResponding);
    assert_eq!(probe.check("").await, Liveness::NotResponding);
}
