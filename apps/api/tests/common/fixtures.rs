//! Test fixtures for API integration tests

#![allow(dead_code)]

use serde_json::{json, Value};

/// Signing secret for test apps
pub const TEST_JWT_SECRET: &str = "test-secret-that-is-long-enough-for-testing-purposes";

/// Password accepted by registration
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Registration body for `email`
pub fn register_body(email: &str) -> Value {
    json!({
        "email": email,
        "password": TEST_PASSWORD,
        "displayName": "Test Listener",
    })
}

/// Login body for `email`
pub fn login_body(email: &str, password: &str) -> Value {
    json!({
        "email": email,
        "password": password,
    })
}

/// `len` bytes where byte `i` is `i % 251`, so any slice is recognizable
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
