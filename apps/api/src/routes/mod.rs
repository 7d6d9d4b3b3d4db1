//! HTTP route handlers for the Tandem API
//!
//! - Authentication endpoints
//! - Playback state and remote control
//! - Device picker
//! - Audio streaming
//! - Health check and status endpoints
//! - The realtime WebSocket upgrade

pub mod auth;
pub mod devices;
pub mod health;
pub mod player;
pub mod streaming;

pub use auth::{auth_router, AuthState, OkResponse};
pub use devices::devices_router;
pub use health::{health_router, HealthState};
pub use player::{player_router, PlayerState};
pub use streaming::{streaming_router, StreamingState};

use axum::{extract::Extension, routing::get, Router};
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::repositories::Stores;
use crate::services::{AuthConfig, AuthService, HealthService, PlaybackService, StreamService};
use crate::websocket::{ws_handler, BroadcastRouter, ConnectionRegistry, RealtimeContext, WsConfig};

/// Tunables the application is assembled with
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub auth: AuthConfig,
    pub auth_request_timeout: Duration,
    pub storage_root: PathBuf,
    pub stream_chunk_bytes: u64,
    pub ws: WsConfig,
    pub ws_send_queue_capacity: usize,
}

impl AppSettings {
    /// Defaults around a JWT secret and storage root
    pub fn new(jwt_secret: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            auth: AuthConfig::new(jwt_secret.into()),
            auth_request_timeout: auth::DEFAULT_AUTH_TIMEOUT,
            storage_root: storage_root.into(),
            stream_chunk_bytes: crate::services::stream::DEFAULT_CHUNK_BYTES,
            ws: WsConfig::default(),
            ws_send_queue_capacity: 64,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            auth: config.auth_config(),
            auth_request_timeout: config.auth_request_timeout,
            storage_root: config.common.storage_root.clone(),
            stream_chunk_bytes: config.stream_chunk_bytes,
            ws: config.ws_config(),
            ws_send_queue_capacity: config.ws_send_queue_capacity,
        }
    }
}

/// Every service the routers need, wired over one set of stores
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub auth: AuthService,
    pub playback: PlaybackService,
    pub stream: StreamService,
    pub health: HealthService,
    pub ws_config: WsConfig,
    pub auth_request_timeout: Duration,
}

impl AppState {
    /// `pool` is only used for readiness checks; pass `None` for in-memory stores
    pub fn new(stores: Stores, pool: Option<PgPool>, settings: AppSettings) -> Self {
        let registry = ConnectionRegistry::new(settings.ws_send_queue_capacity);
        let router = BroadcastRouter::new(registry.clone());

        Self {
            auth: AuthService::new(stores.listeners, stores.sessions, settings.auth),
            playback: PlaybackService::new(stores.playback, stores.devices, router),
            stream: StreamService::new(
                stores.tracks,
                settings.storage_root,
                settings.stream_chunk_bytes,
            ),
            health: HealthService::new(pool, registry.clone()),
            registry,
            ws_config: settings.ws,
            auth_request_timeout: settings.auth_request_timeout,
        }
    }

    pub fn realtime_context(&self) -> RealtimeContext {
        RealtimeContext {
            registry: self.registry.clone(),
            auth: self.auth.clone(),
            playback: self.playback.clone(),
            config: self.ws_config,
        }
    }
}

/// Build the application router
///
/// Tracing and CORS layers are added by the binary.
pub fn app_router(state: AppState) -> Router {
    let auth_state =
        AuthState::new(state.auth.clone()).with_timeout(state.auth_request_timeout);
    let player_state = PlayerState::new(state.playback.clone());

    Router::new()
        .route("/", get(root))
        // /health, /health/live, /health/ready
        .nest("/health", health_router(HealthState::new(state.health.clone())))
        // /auth/register, /auth/login, /auth/refresh, /auth/logout
        .nest("/auth", auth_router(auth_state))
        // /player/state, /player/activate, /player/control
        .nest("/player", player_router(player_state.clone()))
        // /devices, /devices/heartbeat
        .nest("/devices", devices_router(player_state))
        // /tracks/:track_id/stream
        .nest("/tracks", streaming_router(StreamingState::new(state.stream.clone())))
        .route("/ws", get(ws_handler))
        .layer(Extension(state.realtime_context()))
        .layer(Extension(state.auth))
}

async fn root() -> &'static str {
    "Tandem playback sync server"
}
