//! Business logic services for Tandem
//!
//! - Session management (register, login, refresh, logout)
//! - Playback coordination between the state store and connected devices
//! - Range-aware audio streaming
//! - Health checks

pub mod auth;
pub mod health;
pub mod playback;
pub mod stream;

pub use auth::{AuthConfig, AuthService};
pub use health::HealthService;
pub use playback::{Origin, PlaybackService};
pub use stream::{AudioStream, ByteRange, ResolvedTrack, StreamService};
