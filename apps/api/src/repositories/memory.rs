//! In-memory store implementations
//!
//! Used when no `DATABASE_URL` is configured in development, and by tests.
//! Each store is a `DashMap`; per-key writes go through the entry API so a
//! listener's document is updated under a single shard lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

use super::{DeviceStore, ListenerStore, PlaybackStore, SessionStore, TrackStore};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    content_type_for_path, Device, DeviceHeartbeat, Listener, NewListener, NewSession,
    PlaybackPatch, PlaybackState, Session, TrackFile,
};

// ========== Listeners ==========

#[derive(Clone, Default)]
pub struct MemoryListenerStore {
    by_id: Arc<DashMap<Uuid, Listener>>,
    by_email: Arc<DashMap<String, Uuid>>,
}

impl MemoryListenerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListenerStore for MemoryListenerStore {
    async fn create(&self, new: &NewListener) -> ApiResult<Listener> {
        match self.by_email.entry(new.email.clone()) {
            Entry::Occupied(_) => Err(ApiError::conflict("listener", &new.email)),
            Entry::Vacant(slot) => {
                let listener = Listener {
                    id: Uuid::new_v4(),
                    email: new.email.clone(),
                    password_hash: new.password_hash.clone(),
                    display_name: new.display_name.clone(),
                    role: new.role,
                    created_at: Utc::now(),
                };
                self.by_id.insert(listener.id, listener.clone());
                slot.insert(listener.id);
                Ok(listener)
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> ApiResult<Option<Listener>> {
        let id = match self.by_email.get(email) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.by_id.get(&id).map(|l| l.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Listener>> {
        Ok(self.by_id.get(&id).map(|l| l.clone()))
    }
}

// ========== Sessions ==========

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<Uuid, Session>>,
    /// refresh fingerprint -> listener id
    by_fingerprint: Arc<DashMap<String, Uuid>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the index at `current`; called with the session entry locked
    fn reindex(&self, previous: &str, current: &str, listener_id: Uuid) {
        if !previous.is_empty() && previous != current {
            self.by_fingerprint.remove(previous);
        }
        self.by_fingerprint.insert(current.to_string(), listener_id);
    }

    #[cfg(test)]
    pub(crate) fn session(&self, listener_id: Uuid) -> Option<Session> {
        self.sessions.get(&listener_id).map(|s| s.clone())
    }

    #[cfg(test)]
    fn indexed_fingerprints(&self) -> usize {
        self.by_fingerprint.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert(&self, new: &NewSession) -> ApiResult<Session> {
        let mut entry = self.sessions.entry(new.listener_id).or_insert_with(|| Session {
            listener_id: new.listener_id,
            refresh_hash: String::new(),
            refresh_fingerprint: String::new(),
            issued_at: Utc::now(),
            expires_at: new.expires_at,
            disabled: false,
            last_device: None,
        });

        let session = entry.value_mut();
        self.reindex(&session.refresh_fingerprint, &new.refresh_fingerprint, new.listener_id);
        session.refresh_hash = new.refresh_hash.clone();
        session.refresh_fingerprint = new.refresh_fingerprint.clone();
        session.issued_at = Utc::now();
        session.expires_at = new.expires_at;
        session.disabled = false;
        if new.last_device.is_some() {
            session.last_device = new.last_device.clone();
        }

        Ok(session.clone())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> ApiResult<Option<Session>> {
        let Some(listener_id) = self.by_fingerprint.get(fingerprint).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&listener_id)
            .filter(|s| s.refresh_fingerprint == fingerprint)
            .map(|s| s.clone()))
    }

    async fn rotate(
        &self,
        listener_id: Uuid,
        previous_fingerprint: &str,
        refresh_hash: &str,
        refresh_fingerprint: &str,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<bool> {
        let Some(mut session) = self.sessions.get_mut(&listener_id) else {
            return Ok(false);
        };
        if session.disabled || session.refresh_fingerprint != previous_fingerprint {
            return Ok(false);
        }

        self.reindex(previous_fingerprint, refresh_fingerprint, listener_id);
        session.refresh_hash = refresh_hash.to_string();
        session.refresh_fingerprint = refresh_fingerprint.to_string();
        session.expires_at = expires_at;
        Ok(true)
    }

    async fn disable(&self, listener_id: Uuid) -> ApiResult<bool> {
        match self.sessions.get_mut(&listener_id) {
            Some(mut session) => {
                session.disabled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ========== Playback ==========

#[derive(Clone, Default)]
pub struct MemoryPlaybackStore {
    states: Arc<DashMap<Uuid, PlaybackState>>,
}

impl MemoryPlaybackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlaybackStore for MemoryPlaybackStore {
    async fn upsert(&self, listener_id: Uuid, patch: &PlaybackPatch) -> ApiResult<PlaybackState> {
        let mut entry = self
            .states
            .entry(listener_id)
            .or_insert_with(|| PlaybackState::default_for(listener_id));
        entry.apply(patch, Utc::now());
        Ok(entry.clone())
    }

    async fn activate(&self, listener_id: Uuid, device_id: &str) -> ApiResult<PlaybackState> {
        let mut entry = self
            .states
            .entry(listener_id)
            .or_insert_with(|| PlaybackState::default_for(listener_id));
        entry.activate(device_id, Utc::now());
        Ok(entry.clone())
    }

    async fn read(&self, listener_id: Uuid) -> ApiResult<PlaybackState> {
        Ok(self
            .states
            .get(&listener_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| PlaybackState::default_for(listener_id)))
    }
}

// ========== Devices ==========

#[derive(Clone, Default)]
pub struct MemoryDeviceStore {
    devices: Arc<DashMap<(Uuid, String), Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn upsert(&self, listener_id: Uuid, hb: &DeviceHeartbeat) -> ApiResult<Device> {
        let now = Utc::now();
        let mut entry = self
            .devices
            .entry((listener_id, hb.device_id.clone()))
            .or_insert_with(|| Device {
                listener_id,
                device_id: hb.device_id.clone(),
                display_name: hb.display_name_or_default(),
                app: None,
                platform: None,
                capabilities: Vec::new(),
                last_seen_at: now,
            });

        let device = entry.value_mut();
        if let Some(name) = &hb.display_name {
            device.display_name = name.clone();
        }
        if hb.app.is_some() {
            device.app = hb.app.clone();
        }
        if hb.platform.is_some() {
            device.platform = hb.platform.clone();
        }
        if let Some(capabilities) = &hb.capabilities {
            device.capabilities = capabilities.clone();
        }
        device.last_seen_at = now;

        Ok(device.clone())
    }

    async fn list(&self, listener_id: Uuid) -> ApiResult<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| d.listener_id == listener_id)
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }
}

// ========== Tracks ==========

#[derive(Debug, Clone)]
struct TrackEntry {
    file: TrackFile,
    play_count: u64,
    last_played_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct MemoryTrackStore {
    tracks: Arc<DashMap<String, TrackEntry>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track's file location
    pub fn insert(&self, file: TrackFile) {
        self.tracks.insert(
            file.id.clone(),
            TrackEntry {
                file,
                play_count: 0,
                last_played_at: None,
            },
        );
    }

    /// Register every audio file under `root`, keyed by its relative path
    ///
    /// Ids use `/` separators, e.g. `albums/one/01.flac`. Unreadable entries
    /// are skipped. Returns the number of tracks registered.
    pub fn scan_library(&self, root: &Path) -> usize {
        let mut found = 0;

        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !content_type_for_path(path).starts_with("audio/") {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let Some(id) = relative
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join("/"))
            else {
                tracing::debug!(path = %path.display(), "Skipping non UTF-8 path");
                continue;
            };

            self.insert(TrackFile::new(id.clone(), id));
            found += 1;
        }

        found
    }

    pub fn play_count(&self, track_id: &str) -> u64 {
        self.tracks.get(track_id).map(|t| t.play_count).unwrap_or(0)
    }

    pub fn last_played_at(&self, track_id: &str) -> Option<DateTime<Utc>> {
        self.tracks.get(track_id).and_then(|t| t.last_played_at)
    }
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn find_file(&self, track_id: &str) -> ApiResult<Option<TrackFile>> {
        Ok(self.tracks.get(track_id).map(|t| t.file.clone()))
    }

    async fn record_play(&self, track_id: &str) -> ApiResult<()> {
        let mut track = self
            .tracks
            .get_mut(track_id)
            .ok_or_else(|| ApiError::not_found("track", track_id))?;
        track.play_count += 1;
        track.last_played_at = Some(Utc::now());
        Ok(())
    }
}
