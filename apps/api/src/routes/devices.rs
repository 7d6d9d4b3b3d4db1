//! Device picker endpoints
//!
//! - `GET /devices` - Known devices with `online` and `active` flags
//! - `POST /devices/heartbeat` - Record that a device is around

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use super::auth::OkResponse;
use super::player::PlayerState;
use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::models::DeviceHeartbeat;

/// Create devices router
pub fn devices_router(state: PlayerState) -> Router {
    Router::new()
        .route("/", get(list_devices))
        .route("/heartbeat", post(heartbeat))
        .with_state(state)
}

async fn list_devices(
    State(state): State<PlayerState>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let devices = state.playback.list_devices(auth.listener_id).await?;
    Ok(Json(devices))
}

async fn heartbeat(
    State(state): State<PlayerState>,
    auth: AuthUser,
    Json(heartbeat): Json<DeviceHeartbeat>,
) -> ApiResult<impl IntoResponse> {
    let device = state.playback.heartbeat(auth.listener_id, &heartbeat).await?;
    tracing::debug!(
        listener_id = %auth.listener_id,
        device_id = %device.device_id,
        "Device heartbeat"
    );
    Ok(OkResponse::ok())
}
