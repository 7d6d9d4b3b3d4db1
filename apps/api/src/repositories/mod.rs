//! Storage layer for Tandem
//!
//! Every store is an `async_trait` contract with a Postgres implementation
//! next to it and an in-memory one in [`memory`]. Services only see
//! `Arc<dyn ...Store>`, so they run unchanged against either backend.

pub mod device;
pub mod listener;
pub mod memory;
pub mod playback;
pub mod session;
pub mod track;
pub mod utils;

use sqlx::PgPool;
use std::sync::Arc;

pub use device::{DeviceStore, PgDeviceStore};
pub use listener::{ListenerStore, PgListenerStore};
pub use memory::{
    MemoryDeviceStore, MemoryListenerStore, MemoryPlaybackStore, MemorySessionStore,
    MemoryTrackStore,
};
pub use playback::{PgPlaybackStore, PlaybackStore};
pub use session::{PgSessionStore, SessionStore};
pub use track::{PgTrackStore, TrackStore};

/// The full set of stores the API runs on
#[derive(Clone)]
pub struct Stores {
    pub listeners: Arc<dyn ListenerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub playback: Arc<dyn PlaybackStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub tracks: Arc<dyn TrackStore>,
}

impl Stores {
    /// Stores backed by a Postgres pool
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            listeners: Arc::new(PgListenerStore::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            playback: Arc::new(PgPlaybackStore::new(pool.clone())),
            devices: Arc::new(PgDeviceStore::new(pool.clone())),
            tracks: Arc::new(PgTrackStore::new(pool)),
        }
    }

    /// In-memory stores; `tracks` is passed in so callers can seed it
    pub fn in_memory(tracks: MemoryTrackStore) -> Self {
        Self {
            listeners: Arc::new(MemoryListenerStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            playback: Arc::new(MemoryPlaybackStore::new()),
            devices: Arc::new(MemoryDeviceStore::new()),
            tracks: Arc::new(tracks),
        }
    }
}
