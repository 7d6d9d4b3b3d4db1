//! Playback state and remote control endpoints
//!
//! - `GET /player/state` - Current playback document (default if none)
//! - `POST /player/state` - Merge a partial update and broadcast it
//! - `POST /player/activate` - Make a device the active one
//! - `POST /player/control` - Send a control command to a device

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::auth::OkResponse;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{validate_device_id, PlaybackPatch};
use crate::services::{Origin, PlaybackService};

/// Issuer recorded on control commands sent without a `from`
const HTTP_CONTROL_ORIGIN: &str = "api";

/// Shared state for player and device handlers
#[derive(Clone)]
pub struct PlayerState {
    pub playback: PlaybackService,
}

impl PlayerState {
    pub fn new(playback: PlaybackService) -> Self {
        Self { playback }
    }
}

/// Create player router
pub fn player_router(state: PlayerState) -> Router {
    Router::new()
        .route("/state", get(get_state).post(update_state))
        .route("/activate", post(activate))
        .route("/control", post(control))
        .with_state(state)
}

// ========== Request Types ==========

/// Partial playback update from an HTTP client acting as `device_id`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateRequest {
    pub device_id: String,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub position_ms: Option<i64>,
    #[serde(default)]
    pub is_playing: Option<bool>,
    #[serde(default)]
    pub queue: Option<Vec<String>>,
    #[serde(default)]
    pub current_index: Option<i32>,
}

impl StateUpdateRequest {
    fn into_patch(self) -> PlaybackPatch {
        PlaybackPatch {
            updated_by: self.device_id,
            track_id: self.track_id,
            position_ms: self.position_ms,
            is_playing: self.is_playing,
            queue: self.queue,
            current_index: self.current_index,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBody {
    pub cmd: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

// ========== Route Handlers ==========

async fn get_state(
    State(state): State<PlayerState>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let playback = state.playback.read_state(auth.listener_id).await?;
    Ok(Json(playback))
}

/// Merge a partial update
///
/// The writer's own device is excluded from the broadcast.
async fn update_state(
    State(state): State<PlayerState>,
    auth: AuthUser,
    Json(request): Json<StateUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_device_id(&request.device_id)
        .map_err(|e| ApiError::ValidationError(e.to_string()))?;

    let origin = Origin::Device(request.device_id.clone());
    state
        .playback
        .update_state(auth.listener_id, request.into_patch(), origin)
        .await?;

    Ok(OkResponse::ok())
}

async fn activate(
    State(state): State<PlayerState>,
    auth: AuthUser,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .playback
        .activate(auth.listener_id, &request.device_id)
        .await?;
    Ok(OkResponse::ok())
}

/// Route a command to `to`, or to the active device
///
/// # Response
/// - 200 OK: delivered to at least one connection
/// - 409 Conflict: `NO_ACTIVE_DEVICE`
async fn control(
    State(state): State<PlayerState>,
    auth: AuthUser,
    Json(body): Json<ControlBody>,
) -> ApiResult<impl IntoResponse> {
    let from = body.from.as_deref().unwrap_or(HTTP_CONTROL_ORIGIN);
    state
        .playback
        .send_control(auth.listener_id, from, body.to.as_deref(), &body.cmd, body.args)
        .await?;
    Ok(OkResponse::ok())
}
