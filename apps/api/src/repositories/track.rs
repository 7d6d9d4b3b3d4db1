//! Track catalog lookups used by the stream server
//!
//! The catalog itself is owned elsewhere. The streaming path only reads a
//! track's file location and bumps its play counter.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::ApiResult;
use crate::models::TrackFile;

/// Read-mostly view of the track catalog
#[async_trait]
pub trait TrackStore: Send + Sync {
    /// File location for a track, `None` if the track is unknown
    async fn find_file(&self, track_id: &str) -> ApiResult<Option<TrackFile>>;

    /// Increment the play counter and stamp `last_played_at`
    async fn record_play(&self, track_id: &str) -> ApiResult<()>;
}

/// Postgres-backed track store
#[derive(Clone)]
pub struct PgTrackStore {
    pool: PgPool,
}

impl PgTrackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackStore for PgTrackStore {
    async fn find_file(&self, track_id: &str) -> ApiResult<Option<TrackFile>> {
        let track = sqlx::query_as::<_, TrackFile>("SELECT id, file_path FROM tracks WHERE id = $1")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(track)
    }

    async fn record_play(&self, track_id: &str) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE tracks
            SET play_count = play_count + 1,
                last_played_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(track_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
