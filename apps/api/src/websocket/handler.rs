//! WebSocket upgrade handler and per-socket tasks
//!
//! The upgrade itself is unauthenticated; identity arrives later in the
//! `hello` message. Each socket gets one writer task draining its bounded
//! queue and one reader task feeding the `SyncHandler`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::connection::ConnectionRegistry;
use super::messages::{ServerMessage, WelcomePayload};
use super::sync::SyncHandler;
use crate::services::{AuthService, PlaybackService};

/// Liveness settings for realtime connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsConfig {
    /// How often the writer sends a WebSocket Ping
    pub ping_interval: Duration,
    /// Intervals without any inbound frame before the socket is closed
    pub max_missed_pongs: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
        }
    }
}

impl WsConfig {
    /// Longest a connection may stay silent
    pub fn max_idle(&self) -> Duration {
        self.ping_interval * self.max_missed_pongs.max(1)
    }
}

/// Everything a realtime connection needs, shared via `Extension`
#[derive(Clone)]
pub struct RealtimeContext {
    pub registry: ConnectionRegistry,
    pub auth: AuthService,
    pub playback: PlaybackService,
    pub config: WsConfig,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(ctx): Extension<RealtimeContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, ctx: RealtimeContext) {
    let RealtimeContext {
        registry,
        auth,
        playback,
        config,
    } = ctx;

    // The registry holds the only sender; pruning the entry ends the writer
    let (tx, mut rx) = registry.channel();
    let connection_id = registry.register(tx);

    let Some(last_seen) = registry.last_seen_handle(connection_id) else {
        return;
    };

    let welcome = ServerMessage::Welcome(WelcomePayload {
        connection_id,
        server_time: chrono::Utc::now().timestamp_millis(),
        heartbeat_interval_ms: config.ping_interval.as_millis() as u64,
    });
    if let Err(e) = registry.send_to_connection(connection_id, welcome) {
        tracing::warn!(connection_id = %connection_id, error = %e, "Failed to queue welcome");
        registry.remove(connection_id);
        return;
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let max_idle_ms = config.max_idle().as_millis() as i64;
    let mut send_task = tokio::spawn(async move {
        let mut ticker = interval_at(
            Instant::now() + config.ping_interval,
            config.ping_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        tracing::debug!(connection_id = %connection_id, "Outbound queue closed");
                        break;
                    };
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json)).await.is_err() {
                                tracing::debug!(connection_id = %connection_id, "WebSocket send failed");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                        }
                    }
                }
                _ = ticker.tick() => {
                    let idle_ms = chrono::Utc::now().timestamp_millis()
                        - last_seen.load(Ordering::Relaxed);
                    if idle_ms > max_idle_ms {
                        tracing::info!(
                            connection_id = %connection_id,
                            idle_ms,
                            "Closing idle WebSocket connection"
                        );
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let handler = SyncHandler::new(connection_id, registry.clone(), auth, playback);
    let recv_registry = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            recv_registry.touch(connection_id);
            match result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = handler.handle_text(&text).await {
                        tracing::warn!(
                            error = %e,
                            connection_id = %connection_id,
                            "Error handling client message"
                        );
                    }
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Received unsupported binary message");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    tracing::trace!(connection_id = %connection_id, "Received keepalive frame");
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "WebSocket close received");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, connection_id = %connection_id, "WebSocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
        }
    }

    registry.remove(connection_id);
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Periodically drop connections that went silent or lost their writer
pub fn spawn_stale_sweeper(registry: ConnectionRegistry, config: WsConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = registry.sweep_stale(config.max_idle());
            if removed > 0 {
                tracing::info!(removed, "Swept stale connections");
            }
        }
    })
}
