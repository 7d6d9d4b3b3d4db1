//! Canonical playback state and partial updates to it
//!
//! One `PlaybackState` document exists per listener. Writers send a
//! `PlaybackPatch` holding only the fields they changed; merging is per field,
//! so the last writer of each field wins independently of the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on queue length accepted in one patch
pub const MAX_QUEUE_LEN: usize = 10_000;

/// Errors from validating a playback patch
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackValidationError {
    #[error("positionMs must not be negative (got {0})")]
    NegativePosition(i64),
    #[error("currentIndex must not be negative (got {0})")]
    NegativeIndex(i32),
    #[error("queue exceeds maximum length of {MAX_QUEUE_LEN} (got {0})")]
    QueueTooLong(usize),
    #[error("updatedBy cannot be empty")]
    MissingAuthor,
}

/// The per-listener playback document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub listener_id: Uuid,
    pub track_id: Option<String>,
    pub position_ms: i64,
    pub is_playing: bool,
    pub queue: Vec<String>,
    pub current_index: i32,
    pub active_device_id: Option<String>,
    /// `None` until the first write
    pub updated_at: Option<DateTime<Utc>>,
    /// Device id of the last writer
    pub updated_by: Option<String>,
}

impl PlaybackState {
    /// The document a listener has before anything was written
    pub fn default_for(listener_id: Uuid) -> Self {
        Self {
            listener_id,
            track_id: None,
            position_ms: 0,
            is_playing: false,
            queue: Vec::new(),
            current_index: 0,
            active_device_id: None,
            updated_at: None,
            updated_by: None,
        }
    }

    /// Merge a patch into this document field by field
    pub fn apply(&mut self, patch: &PlaybackPatch, now: DateTime<Utc>) {
        if let Some(track_id) = &patch.track_id {
            self.track_id = Some(track_id.clone());
        }
        if let Some(position_ms) = patch.position_ms {
            self.position_ms = position_ms;
        }
        if let Some(is_playing) = patch.is_playing {
            self.is_playing = is_playing;
        }
        if let Some(queue) = &patch.queue {
            self.queue = queue.clone();
        }
        if let Some(current_index) = patch.current_index {
            self.current_index = current_index;
        }
        self.updated_at = Some(now);
        self.updated_by = Some(patch.updated_by.clone());
    }

    /// Set the active device without touching playback fields
    pub fn activate(&mut self, device_id: &str, now: DateTime<Utc>) {
        self.active_device_id = Some(device_id.to_string());
        self.updated_at = Some(now);
        self.updated_by = Some(device_id.to_string());
    }
}

/// A partial update; `None` fields are left as they are
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPatch {
    /// Device id of the writer
    pub updated_by: String,
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

impl PlaybackPatch {
    pub fn new(updated_by: impl Into<String>) -> Self {
        Self {
            updated_by: updated_by.into(),
            ..Default::default()
        }
    }

    pub fn track(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }

    pub fn position(mut self, position_ms: i64) -> Self {
        self.position_ms = Some(position_ms);
        self
    }

    pub fn playing(mut self, is_playing: bool) -> Self {
        self.is_playing = Some(is_playing);
        self
    }

    pub fn queue(mut self, queue: Vec<String>, current_index: i32) -> Self {
        self.queue = Some(queue);
        self.current_index = Some(current_index);
        self
    }

    /// True when the patch changes no playback field
    pub fn is_empty(&self) -> bool {
        self.track_id.is_none()
            && self.position_ms.is_none()
            && self.is_playing.is_none()
            && self.queue.is_none()
            && self.current_index.is_none()
    }

    pub fn validate(&self) -> Result<(), PlaybackValidationError> {
        if self.updated_by.is_empty() {
            return Err(PlaybackValidationError::MissingAuthor);
        }
        if let Some(position_ms) = self.position_ms {
            if position_ms < 0 {
                return Err(PlaybackValidationError::NegativePosition(position_ms));
            }
        }
        if let Some(current_index) = self.current_index {
            if current_index < 0 {
                return Err(PlaybackValidationError::NegativeIndex(current_index));
            }
        }
        if let Some(queue) = &self.queue {
            if queue.len() > MAX_QUEUE_LEN {
                return Err(PlaybackValidationError::QueueTooLong(queue.len()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_document() {
        let id = Uuid::new_v4();
        let state = PlaybackState::default_for(id);
        assert_eq!(state.listener_id, id);
        assert!(!state.is_playing);
        assert_eq!(state.position_ms, 0);
        assert!(state.queue.is_empty());
        assert_eq!(state.current_index, 0);
        assert!(state.updated_at.is_none());
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut state = PlaybackState::default_for(Uuid::new_v4());
        let now = Utc::now();

        state.apply(&PlaybackPatch::new("phone").track("T1").position(5000), now);
        state.apply(&PlaybackPatch::new("desktop").playing(true), now);

        assert_eq!(state.track_id.as_deref(), Some("T1"));
        assert_eq!(state.position_ms, 5000);
        assert!(state.is_playing);
        assert_eq!(state.updated_by.as_deref(), Some("desktop"));
    }

    #[test]
    fn test_activate_keeps_playback_fields() {
        let mut state = PlaybackState::default_for(Uuid::new_v4());
        state.apply(&PlaybackPatch::new("phone").track("T9"), Utc::now());
        state.activate("speaker", Utc::now());

        assert_eq!(state.active_device_id.as_deref(), Some("speaker"));
        assert_eq!(state.track_id.as_deref(), Some("T9"));
    }

    #[test]
    fn test_patch_validation() {
        assert!(PlaybackPatch::new("a").position(10).validate().is_ok());
        assert_eq!(
            PlaybackPatch::new("a").position(-1).validate(),
            Err(PlaybackValidationError::NegativePosition(-1))
        );
        assert_eq!(
            PlaybackPatch::new("").validate(),
            Err(PlaybackValidationError::MissingAuthor)
        );
        let huge = vec!["t".to_string(); MAX_QUEUE_LEN + 1];
        assert!(matches!(
            PlaybackPatch::new("a").queue(huge, 0).validate(),
            Err(PlaybackValidationError::QueueTooLong(_))
        ));
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(PlaybackPatch::new("a").is_empty());
        assert!(!PlaybackPatch::new("a").playing(false).is_empty());
    }

    #[test]
    fn test_state_json_shape() {
        let state = PlaybackState::default_for(Uuid::nil());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isPlaying"], false);
        assert_eq!(json["positionMs"], 0);
        assert_eq!(json["currentIndex"], 0);
        assert!(json["queue"].as_array().unwrap().is_empty());
    }
}
