use axum::Json;
use crate::models::HealthResponse;
use tracing::debug;

fn health(message: &str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: message.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    health("Server is running")
}

/// Readiness check endpoint. The hub lives in-process, so being up means being ready.
pub async fn ready_check() -> Json<HealthResponse> {
    debug!("Readiness check requested");
    health("Service is ready")
}
