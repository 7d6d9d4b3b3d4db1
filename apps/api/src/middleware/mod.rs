//! Middleware components for Tandem API
//!
//! Authentication extractor for Axum handlers:
//! - `AuthUser`: requires a valid access token, returns 401 if missing/invalid

pub mod auth;

pub use auth::{AuthRejection, AuthUser};
