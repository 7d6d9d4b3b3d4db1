//! Playback state storage
//!
//! Writes are a single `INSERT ... ON CONFLICT DO UPDATE` per call, so each
//! upsert is atomic for its listener and absent patch fields keep their
//! stored value (`COALESCE`).

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::utils::PLAYBACK_COLUMNS;
use crate::error::ApiResult;
use crate::models::{PlaybackPatch, PlaybackState};

/// The canonical per-listener playback document
#[async_trait]
pub trait PlaybackStore: Send + Sync {
    /// Merge `patch` field by field and return the full resulting document
    async fn upsert(&self, listener_id: Uuid, patch: &PlaybackPatch) -> ApiResult<PlaybackState>;

    /// Set `active_device_id` only, creating the document if needed
    async fn activate(&self, listener_id: Uuid, device_id: &str) -> ApiResult<PlaybackState>;

    /// Current document, or the default one if nothing was ever written
    async fn read(&self, listener_id: Uuid) -> ApiResult<PlaybackState>;
}

/// Postgres-backed playback store
#[derive(Clone)]
pub struct PgPlaybackStore {
    pool: PgPool,
}

impl PgPlaybackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlaybackStore for PgPlaybackStore {
    async fn upsert(&self, listener_id: Uuid, patch: &PlaybackPatch) -> ApiResult<PlaybackState> {
        let query = format!(
            r#"
            INSERT INTO playback_states (
                listener_id, track_id, position_ms, is_playing,
                queue, current_index, updated_at, updated_by
            )
            VALUES (
                $1, $2, COALESCE($3, 0), COALESCE($4, false),
                COALESCE($5, ARRAY[]::TEXT[]), COALESCE($6, 0), NOW(), $7
            )
            ON CONFLICT (listener_id) DO UPDATE SET
                track_id = COALESCE($2, playback_states.track_id),
                position_ms = COALESCE($3, playback_states.position_ms),
                is_playing = COALESCE($4, playback_states.is_playing),
                queue = COALESCE($5, playback_states.queue),
                current_index = COALESCE($6, playback_states.current_index),
                updated_at = NOW(),
                updated_by = $7
            RETURNING {PLAYBACK_COLUMNS}
            "#
        );

        let state = sqlx::query_as::<_, PlaybackState>(&query)
            .bind(listener_id)
            .bind(&patch.track_id)
            .bind(patch.position_ms)
            .bind(patch.is_playing)
            .bind(&patch.queue)
            .bind(patch.current_index)
            .bind(&patch.updated_by)
            .fetch_one(&self.pool)
            .await?;

        Ok(state)
    }

    async fn activate(&self, listener_id: Uuid, device_id: &str) -> ApiResult<PlaybackState> {
        let query = format!(
            r#"
            INSERT INTO playback_states (listener_id, active_device_id, updated_at, updated_by)
            VALUES ($1, $2, NOW(), $2)
            ON CONFLICT (listener_id) DO UPDATE SET
                active_device_id = EXCLUDED.active_device_id,
                updated_at = NOW(),
                updated_by = EXCLUDED.updated_by
            RETURNING {PLAYBACK_COLUMNS}
            "#
        );

        let state = sqlx::query_as::<_, PlaybackState>(&query)
            .bind(listener_id)
            .bind(device_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(state)
    }

    async fn read(&self, listener_id: Uuid) -> ApiResult<PlaybackState> {
        let query =
            format!("SELECT {PLAYBACK_COLUMNS} FROM playback_states WHERE listener_id = $1");

        let state = sqlx::query_as::<_, PlaybackState>(&query)
            .bind(listener_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(state.unwrap_or_else(|| PlaybackState::default_for(listener_id)))
    }
}
