use crate::AppState;
use crate::models::{ChannelName, ChannelPresenceResponse, ErrorResponse};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::error;

/// Who is currently tracked on a channel
pub async fn channel_presence(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Result<(StatusCode, Json<ChannelPresenceResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Validate the channel name
    let name: ChannelName = match channel.parse() {
        Ok(name) => name,
        Err(e) => {
            error!("Invalid channel '{}': {}", channel, e);
            return Err(ErrorResponse::reply(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    // Flatten the snapshot; several connections may share a presence key
    let participants = state
        .hub
        .presence(&name.to_string())
        .map(|snapshot| snapshot.into_values().flatten().collect())
        .unwrap_or_default();

    Ok((
        StatusCode::OK,
        Json(ChannelPresenceResponse {
            channel: name.to_string(),
            participants,
        }),
    ))
}
