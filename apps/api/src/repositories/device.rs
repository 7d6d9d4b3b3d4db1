//! Device storage for the device picker

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::utils::DEVICE_COLUMNS;
use crate::error::ApiResult;
use crate::models::{Device, DeviceHeartbeat};

/// Device record persistence
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or refresh a device, bumping `last_seen_at`
    async fn upsert(&self, listener_id: Uuid, heartbeat: &DeviceHeartbeat) -> ApiResult<Device>;

    /// All devices of a listener, most recently seen first
    async fn list(&self, listener_id: Uuid) -> ApiResult<Vec<Device>>;
}

/// Postgres-backed device store
#[derive(Clone)]
pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn upsert(&self, listener_id: Uuid, heartbeat: &DeviceHeartbeat) -> ApiResult<Device> {
        let query = format!(
            r#"
            INSERT INTO devices (
                listener_id, device_id, display_name, app, platform,
                capabilities, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, ARRAY[]::TEXT[]), NOW())
            ON CONFLICT (listener_id, device_id) DO UPDATE SET
                display_name = CASE
                    WHEN $7 THEN EXCLUDED.display_name
                    ELSE devices.display_name
                END,
                app = COALESCE(EXCLUDED.app, devices.app),
                platform = COALESCE(EXCLUDED.platform, devices.platform),
                capabilities = COALESCE($6, devices.capabilities),
                last_seen_at = NOW()
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let device = sqlx::query_as::<_, Device>(&query)
            .bind(listener_id)
            .bind(&heartbeat.device_id)
            .bind(heartbeat.display_name_or_default())
            .bind(&heartbeat.app)
            .bind(&heartbeat.platform)
            .bind(&heartbeat.capabilities)
            .bind(heartbeat.display_name.is_some())
            .fetch_one(&self.pool)
            .await?;

        Ok(device)
    }

    async fn list(&self, listener_id: Uuid) -> ApiResult<Vec<Device>> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE listener_id = $1 ORDER BY last_seen_at DESC"
        );

        let devices = sqlx::query_as::<_, Device>(&query)
            .bind(listener_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(devices)
    }
}
