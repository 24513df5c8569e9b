use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Hub and auth cache counters
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current counters", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Participants tracked on a channel
#[utoipa::path(
    get,
    path = "/api/v1/channels/{channel}/presence",
    params(
        ("channel" = String, Path, description = "Channel name, `idea-<id>` or `blocknote-<id>`")
    ),
    responses(
        (status = 200, description = "Tracked participants", body = ChannelPresenceResponse),
        (status = 400, description = "Malformed channel name", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn channel_presence_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        channel_presence_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, ChannelPresenceResponse, PresenceState, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
