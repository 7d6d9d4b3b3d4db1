//! Realtime channel for cross-device playback sync
//!
//! - `connection`: registry of live sockets and their bound identity
//! - `router`: fan-out of server messages to a listener's devices
//! - `messages`: wire envelopes
//! - `sync`: per-connection protocol handling
//! - `handler`: the axum upgrade handler and socket tasks

pub mod connection;
pub mod handler;
pub mod messages;
pub mod router;
pub mod sync;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionRegistry, ConnectionState, SendError};
pub use handler::{spawn_stale_sweeper, ws_handler, RealtimeContext, WsConfig};
pub use messages::{ClientMessage, ControlCommand, ErrorPayload, ServerMessage};
pub use router::{BroadcastRouter, RouteError};
pub use sync::{SyncError, SyncHandler};
