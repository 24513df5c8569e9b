use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::PresenceState;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_channels: u32,
    pub n_subscribers: u32,
    pub n_tracked: u32,
    pub n_auth_cached: u64,
}

/// Presence currently tracked on one channel
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChannelPresenceResponse {
    pub channel: String,
    pub participants: Vec<PresenceState>,
}
