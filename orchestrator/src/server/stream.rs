//! Streaming deploy over Server-Sent Events

use std::sync::Arc;
use std::time::Duration;

use api_models::{DeployEvent, PushRequest};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use tracing::info;

use crate::errors::DeployError;
use crate::server::auth::OwnerId;
use crate::server::handlers::decode_push;
use crate::server::state::ServerState;

/// Prepare, push and follow one deploy. Input errors are rejected before the
/// stream opens; everything after that arrives as events.
pub async fn deploy_stream_handler(
    State(state): State<Arc<ServerState>>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<PushRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, DeployError> {
    let input = decode_push(request)?;
    info!(owner = %owner_id, app = %input.app_name, "Streaming deploy requested");

    let events = state.orchestrator.deploy(
        &owner_id,
        &input.app_name,
        input.archive,
        input.env_vars,
    );

    let stream = stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((to_sse(&event), events))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Events go out as unnamed `data:` frames; the `type` field tells them apart
fn to_sse(event: &DeployEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}
