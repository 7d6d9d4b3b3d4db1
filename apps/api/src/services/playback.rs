//! Playback coordination
//!
//! Ties the playback store to the broadcast router: every accepted write is
//! persisted first and then announced to the listener's other connections as
//! a `player_state` message carrying the full document.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{validate_device_id, Device, DeviceHeartbeat, DeviceView, PlaybackPatch, PlaybackState};
use crate::repositories::{DeviceStore, PlaybackStore};
use crate::websocket::{BroadcastRouter, ConnectionId, ControlCommand, RouteError, ServerMessage};

/// Where a write came from, so its author is not echoed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A realtime connection; only that socket is skipped
    Connection(ConnectionId),
    /// An HTTP caller acting as a device; all of that device's sockets are skipped
    Device(String),
}

#[derive(Clone)]
pub struct PlaybackService {
    store: Arc<dyn PlaybackStore>,
    devices: Arc<dyn DeviceStore>,
    router: BroadcastRouter,
}

impl PlaybackService {
    pub fn new(
        store: Arc<dyn PlaybackStore>,
        devices: Arc<dyn DeviceStore>,
        router: BroadcastRouter,
    ) -> Self {
        Self {
            store,
            devices,
            router,
        }
    }

    /// Canonical document, default if never written
    pub async fn read_state(&self, listener_id: Uuid) -> ApiResult<PlaybackState> {
        self.store.read(listener_id).await
    }

    /// Merge a patch and notify every other connection of the listener
    pub async fn update_state(
        &self,
        listener_id: Uuid,
        patch: PlaybackPatch,
        origin: Origin,
    ) -> ApiResult<PlaybackState> {
        patch
            .validate()
            .map_err(|e| ApiError::ValidationError(e.to_string()))?;

        let state = self.store.upsert(listener_id, &patch).await?;
        let msg = ServerMessage::PlayerState(state.clone());

        let delivered = match &origin {
            Origin::Connection(id) => self.router.broadcast_to_listener(listener_id, &msg, Some(*id)),
            Origin::Device(device_id) => {
                self.router.broadcast_from_device(listener_id, &msg, device_id)
            }
        };

        tracing::debug!(
            listener_id = %listener_id,
            updated_by = %patch.updated_by,
            delivered,
            "Playback state updated"
        );

        Ok(state)
    }

    /// Make `device_id` the active device and tell every connection
    pub async fn activate(&self, listener_id: Uuid, device_id: &str) -> ApiResult<PlaybackState> {
        validate_device_id(device_id).map_err(|e| ApiError::ValidationError(e.to_string()))?;

        let state = self.store.activate(listener_id, device_id).await?;
        let delivered = self.router.broadcast_to_listener(
            listener_id,
            &ServerMessage::PlayerState(state.clone()),
            None,
        );

        tracing::info!(listener_id = %listener_id, device_id = %device_id, delivered, "Active device changed");

        Ok(state)
    }

    /// Route a control command to `to`, or to the stored active device
    ///
    /// # Errors
    /// `NoActiveDevice` when there is no target, or the target has no live
    /// connection. Nothing is sent in that case.
    pub async fn send_control(
        &self,
        listener_id: Uuid,
        from: &str,
        to: Option<&str>,
        cmd: &str,
        args: Option<serde_json::Value>,
    ) -> ApiResult<usize> {
        if cmd.trim().is_empty() {
            return Err(ApiError::MissingField("cmd"));
        }

        let target = match to {
            Some(device_id) => Some(device_id.to_string()),
            None => self.store.read(listener_id).await?.active_device_id,
        };
        let target = target.ok_or(ApiError::NoActiveDevice)?;

        let msg = ServerMessage::Control(ControlCommand {
            cmd: cmd.to_string(),
            args,
            from: from.to_string(),
        });

        let delivered = self
            .router
            .route_to_device(listener_id, &target, &msg)
            .map_err(|RouteError::NoActiveDevice| ApiError::NoActiveDevice)?;

        tracing::debug!(listener_id = %listener_id, from = %from, to = %target, cmd = %cmd, "Control routed");

        Ok(delivered)
    }

    /// Record a device heartbeat
    pub async fn heartbeat(&self, listener_id: Uuid, heartbeat: &DeviceHeartbeat) -> ApiResult<Device> {
        heartbeat
            .validate()
            .map_err(|e| ApiError::ValidationError(e.to_string()))?;
        self.devices.upsert(listener_id, heartbeat).await
    }

    /// Known devices with their live status
    pub async fn list_devices(&self, listener_id: Uuid) -> ApiResult<Vec<DeviceView>> {
        let devices = self.devices.list(listener_id).await?;
        let active = self.store.read(listener_id).await?.active_device_id;
        let online = self.router.registry().online_devices(listener_id);

        Ok(devices
            .into_iter()
            .map(|device| DeviceView {
                online: online.contains(&device.device_id),
                active: active.as_deref() == Some(device.device_id.as_str()),
                device,
            })
            .collect())
    }
}
