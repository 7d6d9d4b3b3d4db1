//! Track file lookup models
//!
//! The catalog owns tracks; the streaming path only needs to know where a
//! track's audio lives on disk.

use serde::Serialize;
use sqlx::FromRow;
use std::path::Path;

/// A track's audio location, relative to the storage root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct TrackFile {
    pub id: String,
    pub file_path: String,
}

impl TrackFile {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
        }
    }
}

/// Map a file extension to the Content-Type served for it
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}
