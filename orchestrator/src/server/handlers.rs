//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use api_models::{
    AppQuery, Envelope, ErrorResponse, HealthResponse, LogsResponse, PrepareRequest,
    PrepareResponse, PushRequest, PushResponse, StatusResponse, VersionResponse,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{error, warn};

use crate::errors::DeployError;
use crate::server::auth::OwnerId;
use crate::server::state::ServerState;
use crate::utils::version_info;

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn required_app_name(app_name: Option<String>) -> Result<String, DeployError> {
    app_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| DeployError::Validation("appName is required".to_string()))
}

/// Validated push payload
pub(crate) struct PushInput {
    pub app_name: String,
    pub archive: Vec<u8>,
    pub env_vars: BTreeMap<String, String>,
}

pub(crate) fn decode_push(request: PushRequest) -> Result<PushInput, DeployError> {
    let (Some(app_name), Some(archive)) = (
        request.app_name.filter(|name| !name.trim().is_empty()),
        request.archive.filter(|archive| !archive.is_empty()),
    ) else {
        return Err(DeployError::Validation(
            "appName and archive are required".to_string(),
        ));
    };

    let archive = STANDARD
        .decode(archive.trim())
        .map_err(|e| DeployError::Validation(format!("archive is not valid base64: {}", e)))?;

    Ok(PushInput {
        app_name,
        archive,
        env_vars: request.env_vars.unwrap_or_default(),
    })
}

pub async fn prepare_handler(
    State(state): State<Arc<ServerState>>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<Envelope<PrepareResponse>>, DeployError> {
    let app_name = required_app_name(request.app_name)?;
    let prepared = state.orchestrator.prepare(&owner_id, &app_name).await?;
    Ok(Json(Envelope::new(PrepareResponse {
        resource_name: prepared.resource_name,
        resource_url: prepared.resource_url,
    })))
}

pub async fn push_handler(
    State(state): State<Arc<ServerState>>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<PushRequest>,
) -> Result<Json<Envelope<PushResponse>>, DeployError> {
    let input = decode_push(request)?;
    let status = state
        .orchestrator
        .push(&owner_id, &input.app_name, &input.archive, &input.env_vars)
        .await?;
    Ok(Json(Envelope::new(PushResponse {
        status: status.to_string(),
    })))
}

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    OwnerId(owner_id): OwnerId,
    Query(query): Query<AppQuery>,
) -> Result<Json<Envelope<StatusResponse>>, DeployError> {
    let app_name = required_app_name(query.app_name)?;
    let report = state.orchestrator.status(&owner_id, &app_name).await?;
    Ok(Json(Envelope::new(StatusResponse {
        status: report.status.to_string(),
        url: report.url,
        error: report.error,
        message: report.message,
    })))
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    OwnerId(owner_id): OwnerId,
    Query(query): Query<AppQuery>,
) -> Result<Json<Envelope<LogsResponse>>, DeployError> {
    let app_name = required_app_name(query.app_name)?;
    let logs = state.orchestrator.logs(&owner_id, &app_name).await?;
    Ok(Json(Envelope::new(LogsResponse {
        build_log: logs.build_log,
        service_logs: logs.service_logs,
    })))
}
