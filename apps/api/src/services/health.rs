//! Health checks for the API's dependencies
//!
//! - PostgreSQL, when the stores are database-backed
//! - The realtime connection registry (always healthy, reports load)

use serde::Serialize;
use sqlx::PgPool;
use std::time::{Duration, Instant};

use crate::websocket::ConnectionRegistry;

/// Status of an individual service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service is healthy and responding
    Healthy,
    /// Service is unhealthy or unreachable
    Unhealthy,
    /// Service check was skipped (e.g., not configured)
    Skipped,
}

/// Result of a single service health check
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: &'static str,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceHealth {
    pub fn healthy(name: &'static str, response_time: Duration) -> Self {
        Self {
            name,
            status: ServiceStatus::Healthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: None,
            details: None,
        }
    }

    pub fn healthy_with_details(
        name: &'static str,
        response_time: Duration,
        details: serde_json::Value,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::healthy(name, response_time)
        }
    }

    pub fn unhealthy_with_time(
        name: &'static str,
        error: impl Into<String>,
        response_time: Duration,
    ) -> Self {
        Self {
            name,
            status: ServiceStatus::Unhealthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error: Some(error.into()),
            details: None,
        }
    }

    /// Service not configured for this deployment
    pub fn skipped(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            status: ServiceStatus::Skipped,
            response_time_ms: None,
            error: None,
            details: Some(serde_json::json!({ "reason": reason.into() })),
        }
    }
}

/// Aggregated health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    /// Healthy only if every checked service is healthy
    pub status: ServiceStatus,
    pub services: Vec<ServiceHealth>,
    pub total_time_ms: u64,
    pub version: &'static str,
}

impl HealthCheckResponse {
    pub fn new(services: Vec<ServiceHealth>, total_time: Duration) -> Self {
        let status = if services
            .iter()
            .all(|s| s.status == ServiceStatus::Healthy || s.status == ServiceStatus::Skipped)
        {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unhealthy
        };

        Self {
            status,
            services,
            total_time_ms: total_time.as_millis() as u64,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Readiness checks over the running process's own resources
#[derive(Clone)]
pub struct HealthService {
    pool: Option<PgPool>,
    registry: ConnectionRegistry,
}

impl HealthService {
    pub fn new(pool: Option<PgPool>, registry: ConnectionRegistry) -> Self {
        Self { pool, registry }
    }

    /// Round-trip a trivial query on the shared pool
    pub async fn check_database(&self) -> ServiceHealth {
        let Some(pool) = &self.pool else {
            return ServiceHealth::skipped("database", "in-memory stores");
        };

        let start = Instant::now();
        let query = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool);

        match tokio::time::timeout(Duration::from_secs(5), query).await {
            Ok(Ok(_)) => ServiceHealth::healthy_with_details(
                "database",
                start.elapsed(),
                serde_json::json!({
                    "pool_size": pool.size(),
                    "idle_connections": pool.num_idle(),
                }),
            ),
            Ok(Err(e)) => ServiceHealth::unhealthy_with_time(
                "database",
                format!("Query failed: {}", e),
                start.elapsed(),
            ),
            Err(_) => ServiceHealth::unhealthy_with_time(
                "database",
                "Query timed out",
                start.elapsed(),
            ),
        }
    }

    pub fn check_realtime(&self) -> ServiceHealth {
        ServiceHealth::healthy_with_details(
            "realtime",
            Duration::ZERO,
            serde_json::json!({ "connections": self.registry.connection_count() }),
        )
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let start = Instant::now();
        let services = vec![self.check_database().await, self.check_realtime()];
        HealthCheckResponse::new(services, start.elapsed())
    }
}
