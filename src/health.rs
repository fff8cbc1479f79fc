//! Health check module
//! Provides health status for the service and its storage backend

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
#[cfg(feature = "database")]
use std::time::Instant;
use tokio::time::timeout;
use tracing::{error, info};

use crate::api::AppState;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

const SLOW_CHECK_MS: u128 = 1000;

/// Health checker for the application
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
}

impl HealthChecker {
    /// Checker for a service running on in-memory stores.
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[cfg(feature = "database")]
    pub fn with_database(db_pool: sqlx::PgPool) -> Self {
        Self {
            db_pool: Some(db_pool),
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let storage = match timeout(Duration::from_secs(5), self.check_storage()).await {
            Ok(component) => component,
            Err(_) => {
                error!("Storage health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };

        health_status.status = match storage.status {
            ComponentState::Up => HealthState::Healthy,
            ComponentState::Warning => HealthState::Degraded,
            ComponentState::Down => HealthState::Unhealthy,
        };
        health_status.checks.insert("storage".to_string(), storage);
        health_status
    }

    async fn check_storage(&self) -> ComponentHealth {
        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let start = Instant::now();
            return match crate::database::health_check(pool).await {
                Ok(()) => {
                    let elapsed = start.elapsed().as_millis();
                    let stats = crate::database::get_pool_stats(pool);
                    info!(
                        response_time_ms = elapsed,
                        pool_size = stats.size,
                        idle = stats.num_idle,
                        "Database health check: OK"
                    );
                    if elapsed > SLOW_CHECK_MS {
                        ComponentHealth::warning(Some(elapsed), Some("slow response".to_string()))
                    } else {
                        ComponentHealth::up(Some(elapsed))
                    }
                }
                Err(e) => {
                    error!("Database health check failed: {}", e);
                    ComponentHealth::down(Some(e.to_string()))
                }
            };
        }

        let mut component = ComponentHealth::up(Some(0));
        component.details = Some("in-memory".to_string());
        component
    }
}

pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.is_healthy() {
        Ok(Json(health_status))
    } else {
        error!("Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    }
}

/// Readiness probe - storage must answer
pub async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    health(state).await
}

/// Liveness probe
pub async fn liveness() -> &'static str {
    "OK"
}
