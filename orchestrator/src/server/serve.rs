//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    health_handler, logs_handler, prepare_handler, push_handler, status_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::stream::deploy_stream_handler;

/// Build the router
pub fn router(options: &ServerOptions, state: Arc<ServerState>) -> Router {
    // Routes carrying a base64 archive
    let uploads = Router::new()
        .route("/deploy/push", post(push_handler))
        .route("/deploy/stream", post(deploy_stream_handler))
        .layer(DefaultBodyLimit::max(options.max_body_bytes));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deploy
        .route("/deploy/prepare", post(prepare_handler))
        .route("/deploy/status", get(status_handler))
        .route("/deploy/logs", get(logs_handler))
        .merge(uploads)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(options, state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(DeployError::from)
    });

    Ok(handle)
}
