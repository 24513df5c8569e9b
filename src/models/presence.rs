use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// The local participant of a session. Never part of its own collaborator list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Presence payload published with `track()`
    pub fn presence_state(&self) -> PresenceState {
        PresenceState {
            user_id: self.id.clone(),
            user_name: self.name.clone(),
            user_email: self.email.clone(),
            online_at: Utc::now(),
            cursor_position: None,
            selection_start: None,
            selection_end: None,
        }
    }
}

/// State a participant publishes on a channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct PresenceState {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub online_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
}

/// Full presence of a channel: presence key -> tracked states for that key
pub type PresenceSnapshot = BTreeMap<String, Vec<PresenceState>>;

/// A remote participant as seen by the local session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorPresence {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub color: String,
    pub cursor_position: Option<usize>,
    pub selection_start: Option<usize>,
    pub selection_end: Option<usize>,
    pub is_typing: bool,
    pub last_seen: DateTime<Utc>,
}
