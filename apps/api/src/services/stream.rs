//! Seekable audio delivery
//!
//! Resolves a track to a file under the storage root, interprets a single
//! `Range` header and hands back a reader limited to the requested bytes.
//! A successful open counts as a play; the counter is bumped on a detached
//! task so the response never waits for it.

use axum::http::StatusCode;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom, Take};

use crate::error::{ApiError, ApiResult};
use crate::models::content_type_for_path;
use crate::repositories::TrackStore;

/// Bytes served for an open-ended range (`bytes=N-`)
pub const DEFAULT_CHUNK_BYTES: u64 = 1024 * 1024;

/// Inclusive byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value for this range
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// A track whose file exists inside the storage root
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub track_id: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub modified: SystemTime,
    pub content_type: &'static str,
}

/// An opened stream, ready to become a response body
#[derive(Debug)]
pub struct AudioStream {
    /// 200 for the whole file, 206 for a range
    pub status: StatusCode,
    pub file_size: u64,
    pub content_type: &'static str,
    pub range: Option<ByteRange>,
    pub reader: Take<File>,
}

impl AudioStream {
    /// Number of bytes the reader will yield
    pub fn content_length(&self) -> u64 {
        self.range.map(|r| r.len()).unwrap_or(self.file_size)
    }
}

#[derive(Clone)]
pub struct StreamService {
    tracks: Arc<dyn TrackStore>,
    storage_root: PathBuf,
    chunk_bytes: u64,
}

impl StreamService {
    pub fn new(tracks: Arc<dyn TrackStore>, storage_root: PathBuf, chunk_bytes: u64) -> Self {
        Self {
            tracks,
            storage_root,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    /// Look up and stat a track's file without opening it
    pub async fn resolve(&self, track_id: &str) -> ApiResult<ResolvedTrack> {
        let track = self
            .tracks
            .find_file(track_id)
            .await?
            .ok_or_else(|| ApiError::not_found("track", track_id))?;

        let path = validate_file_path(&track.file_path, &self.storage_root).await?;

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            tracing::error!(error = %e, path = %path.display(), "Failed to read audio file metadata");
            ApiError::AudioFileNotFound(track.file_path.clone())
        })?;

        if !metadata.is_file() {
            return Err(ApiError::AudioFileNotFound(track.file_path));
        }

        Ok(ResolvedTrack {
            track_id: track.id,
            content_type: content_type_for_path(Path::new(&track.file_path)),
            path,
            file_size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    /// Resolve and open in one step
    pub async fn open_stream(
        &self,
        track_id: &str,
        range_header: Option<&str>,
    ) -> ApiResult<AudioStream> {
        let track = self.resolve(track_id).await?;
        self.open(&track, range_header).await
    }

    /// Open a resolved track at the requested range and count the play
    ///
    /// Every successful open counts, including each 206 of a player that
    /// fetches a file in chunks. Play counts are therefore request counts,
    /// not listens.
    pub async fn open(
        &self,
        track: &ResolvedTrack,
        range_header: Option<&str>,
    ) -> ApiResult<AudioStream> {
        let range = range_header
            .map(|h| parse_range_header(h, track.file_size, self.chunk_bytes))
            .transpose()?;

        let mut file = File::open(&track.path).await.map_err(|e| {
            tracing::error!(error = %e, path = %track.path.display(), "Failed to open audio file");
            ApiError::AudioFileNotFound(track.track_id.clone())
        })?;

        let (status, len) = match range {
            Some(r) => {
                file.seek(SeekFrom::Start(r.start)).await?;
                (StatusCode::PARTIAL_CONTENT, r.len())
            }
            None => (StatusCode::OK, track.file_size),
        };

        self.record_play(&track.track_id);

        Ok(AudioStream {
            status,
            file_size: track.file_size,
            content_type: track.content_type,
            range,
            reader: file.take(len),
        })
    }

    fn record_play(&self, track_id: &str) {
        let tracks = Arc::clone(&self.tracks);
        let track_id = track_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = tracks.record_play(&track_id).await {
                tracing::warn!(error = %e, track_id = %track_id, "Failed to record play");
            }
        });
    }
}

/// Parse a single-range `Range` header against a file of `file_size` bytes
///
/// Supports `bytes=start-end`, `bytes=start-` (capped at `chunk_bytes`) and
/// `bytes=-suffix`. An explicit end past the file is clamped. Anything that
/// cannot be served yields `RangeNotSatisfiable`.
pub fn parse_range_header(
    range_header: &str,
    file_size: u64,
    chunk_bytes: u64,
) -> ApiResult<ByteRange> {
    let unsatisfiable = || ApiError::RangeNotSatisfiable { file_size };

    let range_spec = range_header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;

    // We only support single ranges
    if range_spec.contains(',') {
        return Err(unsatisfiable());
    }

    let (first, last) = range_spec.split_once('-').ok_or_else(unsatisfiable)?;
    let (first, last) = (first.trim(), last.trim());
    let last_byte = file_size.checked_sub(1).ok_or_else(unsatisfiable)?;

    let parse = |s: &str| s.parse::<u64>().map_err(|_| unsatisfiable());

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        // bytes=500-999
        (false, false) => (parse(first)?, parse(last)?),
        // bytes=500-
        (false, true) => {
            let start = parse(first)?;
            (start, start.saturating_add(chunk_bytes.max(1) - 1).min(last_byte))
        }
        // bytes=-500 (last 500 bytes)
        (true, false) => {
            let suffix_length = parse(last)?;
            if suffix_length == 0 {
                return Err(unsatisfiable());
            }
            (file_size.saturating_sub(suffix_length), last_byte)
        }
        (true, true) => return Err(unsatisfiable()),
    };

    if start > last_byte || start > end {
        return Err(unsatisfiable());
    }

    Ok(ByteRange {
        start,
        end: end.min(last_byte),
    })
}

/// Resolve `file_path` under `storage_root`, refusing anything outside it
///
/// Relative paths with `..` are refused before touching the filesystem, so
/// a traversal attempt cannot probe for file existence.
pub async fn validate_file_path(file_path: &str, storage_root: &Path) -> ApiResult<PathBuf> {
    let file_path = file_path.to_string();
    let root = storage_root.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let input_path = Path::new(&file_path);

        if !input_path.is_absolute()
            && input_path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            tracing::warn!(file_path = %file_path, "Path traversal attempt blocked (contains ..)");
            return Err(ApiError::PathEscape(file_path.clone()));
        }

        let full_path = if input_path.is_absolute() {
            input_path.to_path_buf()
        } else {
            root.join(input_path)
        };

        let canonical = full_path.canonicalize().map_err(|_| {
            tracing::warn!(file_path = %file_path, "Audio file not found or inaccessible");
            ApiError::AudioFileNotFound(file_path.clone())
        })?;

        let canonical_root = root.canonicalize().map_err(|e| {
            tracing::error!(error = %e, path = %root.display(), "Invalid storage root");
            ApiError::Internal(format!("Invalid storage root: {}", e))
        })?;

        if !canonical.starts_with(&canonical_root) {
            tracing::warn!(
                file_path = %file_path,
                canonical = %canonical.display(),
                root = %canonical_root.display(),
                "Path traversal attempt blocked"
            );
            return Err(ApiError::PathEscape(file_path.clone()));
        }

        Ok(canonical)
    })
    .await?
}
