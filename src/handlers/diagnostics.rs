use crate::AppState;
use crate::models::DiagnosticsResponse;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;

/// Aggregate counts for the hub and the auth cache
pub async fn diagnostics(State(state): State<Arc<AppState>>) -> (StatusCode, Json<DiagnosticsResponse>) {
    let stats = state.hub.stats();
    let n_auth_cached = state.auth.entry_count();

    info!(
        "Diagnostics: Channels: {}, Subscribers: {}, Tracked: {}, Auth cached: {}",
        stats.channels, stats.subscribers, stats.tracked, n_auth_cached
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_channels: stats.channels as u32,
            n_subscribers: stats.subscribers as u32,
            n_tracked: stats.tracked as u32,
            n_auth_cached,
        }),
    )
}
