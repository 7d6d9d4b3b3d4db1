//! Data models for Tandem
//!
//! - Listeners, access-token claims and token pairs
//! - Session (refresh chain) records
//! - The per-listener playback document and its patches
//! - Device records for the picker
//! - Track file locations used by the stream server

pub mod device;
pub mod listener;
pub mod playback;
pub mod session;
pub mod track;

pub use device::{validate_device_id, Device, DeviceHeartbeat, DeviceValidationError, DeviceView};
pub use listener::{
    AuthTokens, Claims, Identity, Listener, ListenerRole, NewListener, RefreshedTokens,
};
pub use playback::{PlaybackPatch, PlaybackState, PlaybackValidationError};
pub use session::{DeviceDescriptor, NewSession, Session};
pub use track::{content_type_for_path, TrackFile};
