//! Common test utilities for API integration tests
//!
//! Every test app runs on the in-memory stores with a temporary storage
//! root, so the suite needs no database.

#![allow(unused_imports)]

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
