//! Audio streaming HTTP route handlers
//!
//! - `GET /tracks/:track_id/stream` - Stream an audio file with range support
//! - `HEAD /tracks/:track_id/stream` - File metadata without body
//!
//! Features:
//! - RFC 7233 single-range requests (open ranges are capped per response)
//! - Path traversal prevention
//! - Async streaming without loading the file into memory
//! - ETag and Last-Modified caching headers
//! - Conditional request support (If-None-Match, If-Modified-Since)
//!
//! Only a GET that returns file bytes counts as a play; HEAD and 304 do not.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, response::Builder, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::time::SystemTime;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::services::{ResolvedTrack, StreamService};

const CACHE_CONTROL_VALUE: &str = "private, max-age=31536000, immutable";

/// Shared application state for streaming handlers
#[derive(Clone)]
pub struct StreamingState {
    pub stream_service: StreamService,
}

impl StreamingState {
    pub fn new(stream_service: StreamService) -> Self {
        Self { stream_service }
    }
}

/// Create the streaming router
///
/// # Routes
/// - `GET /:track_id/stream` - Stream audio file for a track
/// - `HEAD /:track_id/stream` - Get file metadata without streaming body
pub fn streaming_router(state: StreamingState) -> Router {
    Router::new()
        .route("/:track_id/stream", get(stream_track).head(head_track))
        .with_state(state)
}

/// Headers shared by every successful or 304 response
fn cache_headers(builder: Builder, etag: &str, last_modified: &str) -> Builder {
    builder
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, etag)
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)
}

fn finish(builder: Builder, body: Body) -> ApiResult<Response> {
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response: {}", e)))
}

/// 304 response when the client's copy is current
fn not_modified(
    headers: &HeaderMap,
    track: &ResolvedTrack,
) -> Option<ApiResult<Response>> {
    let etag = generate_etag(track.file_size, track.modified);
    if !is_cache_valid(headers, &etag, track.modified) {
        return None;
    }
    let last_modified = format_http_date(track.modified);
    let builder = cache_headers(
        Response::builder().status(StatusCode::NOT_MODIFIED),
        &etag,
        &last_modified,
    );
    Some(finish(builder, Body::empty()))
}

/// Stream audio file for a track
///
/// # Request
/// - Headers:
///   - Authorization: Bearer <token> (required)
///   - Range: bytes=START-END (optional, for seeking)
///   - If-None-Match / If-Modified-Since (optional, for caching)
///
/// # Response
/// - 200 OK: Full audio file stream
/// - 206 Partial Content: Partial file for range requests
/// - 304 Not Modified: Cache is still valid
/// - 401 Unauthorized: Missing or invalid token
/// - 403 Forbidden: Track path escapes the storage root
/// - 404 Not Found: Track or audio file not found
/// - 416 Range Not Satisfiable: Invalid byte range
async fn stream_track(
    State(state): State<StreamingState>,
    auth: AuthUser,
    Path(track_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let track = state.stream_service.resolve(&track_id).await?;

    if let Some(response) = not_modified(&headers, &track) {
        return response;
    }

    let range_header = match headers.get(header::RANGE) {
        Some(value) => Some(value.to_str().map_err(|_| ApiError::RangeNotSatisfiable {
            file_size: track.file_size,
        })?),
        None => None,
    };
    let stream = state.stream_service.open(&track, range_header).await?;

    tracing::debug!(
        listener_id = %auth.listener_id,
        track_id = %track_id,
        status = stream.status.as_u16(),
        "Streaming track"
    );

    let etag = generate_etag(track.file_size, track.modified);
    let last_modified = format_http_date(track.modified);

    let mut builder = cache_headers(Response::builder().status(stream.status), &etag, &last_modified)
        .header(header::CONTENT_TYPE, stream.content_type)
        .header(header::CONTENT_LENGTH, stream.content_length());
    if let Some(range) = stream.range {
        builder = builder.header(header::CONTENT_RANGE, range.content_range(stream.file_size));
    }

    finish(builder, Body::from_stream(ReaderStream::new(stream.reader)))
}

/// Get audio file metadata without streaming body
async fn head_track(
    State(state): State<StreamingState>,
    _auth: AuthUser,
    Path(track_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let track = state.stream_service.resolve(&track_id).await?;

    if let Some(response) = not_modified(&headers, &track) {
        return response;
    }

    let etag = generate_etag(track.file_size, track.modified);
    let last_modified = format_http_date(track.modified);
    let builder = cache_headers(Response::builder().status(StatusCode::OK), &etag, &last_modified)
        .header(header::CONTENT_TYPE, track.content_type)
        .header(header::CONTENT_LENGTH, track.file_size);

    finish(builder, Body::empty())
}

/// Generate an ETag from file metadata
///
/// Uses file size and modification time to create a unique identifier.
/// Format: `"{size}-{mtime_secs}"`
fn generate_etag(file_size: u64, modified: SystemTime) -> String {
    let mtime_secs = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{}-{}\"", file_size, mtime_secs)
}

/// Format a SystemTime as an HTTP-date for Last-Modified header
///
/// Format: RFC 7231 (e.g., "Sun, 06 Nov 1994 08:49:37 GMT")
fn format_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Check if the client's cached version is still valid
fn is_cache_valid(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    // Check If-None-Match (takes precedence over If-Modified-Since per RFC 7232)
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH) {
        if let Ok(value) = if_none_match.to_str() {
            // Handle both single value and comma-separated list
            return value.split(',').any(|v| {
                let v = v.trim();
                // RFC 7232: Weak comparison - strip "W/" prefix if present
                let v_trimmed = v.strip_prefix("W/").unwrap_or(v);
                let etag_trimmed = etag.strip_prefix("W/").unwrap_or(etag);
                v_trimmed == etag_trimmed || v == "*"
            });
        }
    }

    // Check If-Modified-Since
    if let Some(if_modified_since) = headers.get(header::IF_MODIFIED_SINCE) {
        if let Ok(value) = if_modified_since.to_str() {
            // Parse HTTP date (supports RFC 1123, RFC 850, and asctime formats)
            if let Ok(if_modified_since_time) = httpdate::parse_http_date(value) {
                // Ignore dates in the future to avoid incorrect 304 responses
                let now = SystemTime::now();
                if if_modified_since_time > now {
                    return false;
                }

                // HTTP dates have second precision, so we truncate the file's modification time
                if let Ok(modified_secs) = modified.duration_since(SystemTime::UNIX_EPOCH) {
                    let modified_truncated = SystemTime::UNIX_EPOCH
                        + std::time::Duration::from_secs(modified_secs.as_secs());
                    return modified_truncated <= if_modified_since_time;
                }
            }
        }
    }

    false
}
