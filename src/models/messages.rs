use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollabError;
use crate::models::{PresenceSnapshot, PresenceState};

/// Full-document snapshot sent after a burst of local edits
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub content: String,
    pub user_id: String,
    pub user_email: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cursor_position: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdate {
    pub user_id: String,
    pub cursor_position: usize,
    pub selection_start: usize,
    pub selection_end: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TypingUpdate {
    pub user_id: String,
    pub is_typing: bool,
}

/// Subscription status reported by a channel
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

/// Messages a participant may broadcast on a channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    ContentChange(ContentChange),
    CursorUpdate(CursorUpdate),
    TypingUpdate(TypingUpdate),
}

impl BroadcastEvent {
    pub fn user_id(&self) -> &str {
        match self {
            BroadcastEvent::ContentChange(c) => &c.user_id,
            BroadcastEvent::CursorUpdate(c) => &c.user_id,
            BroadcastEvent::TypingUpdate(t) => &t.user_id,
        }
    }

    /// Check an incoming payload before it reaches a channel
    pub fn validate(&self, max_content_bytes: usize) -> Result<(), CollabError> {
        if self.user_id().trim().is_empty() {
            return Err(CollabError::InvalidMessage("missing user_id".to_string()));
        }
        match self {
            BroadcastEvent::ContentChange(c) if c.content.len() > max_content_bytes => {
                Err(CollabError::InvalidMessage(format!(
                    "content of {} bytes exceeds limit of {} bytes",
                    c.content.len(),
                    max_content_bytes
                )))
            }
            BroadcastEvent::CursorUpdate(c) if c.selection_start > c.selection_end => {
                Err(CollabError::InvalidMessage(format!(
                    "selection start {} is after selection end {}",
                    c.selection_start, c.selection_end
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Everything a subscriber can receive from a channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChannelEvent {
    Status {
        status: ChannelStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PresenceSync {
        presence: PresenceSnapshot,
    },
    ContentChange(ContentChange),
    CursorUpdate(CursorUpdate),
    TypingUpdate(TypingUpdate),
}

impl ChannelEvent {
    pub fn status(status: ChannelStatus) -> Self {
        ChannelEvent::Status { status, reason: None }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ChannelEvent::Status {
            status: ChannelStatus::ChannelError,
            reason: Some(reason.into()),
        }
    }

    /// Parse a server frame, validating broadcast payloads at the boundary
    pub fn parse(text: &str, max_content_bytes: usize) -> Result<Self, CollabError> {
        let event: ChannelEvent = serde_json::from_str(text)?;
        if let Some(broadcast) = event.as_broadcast() {
            broadcast.validate(max_content_bytes)?;
        }
        Ok(event)
    }

    fn as_broadcast(&self) -> Option<BroadcastEvent> {
        match self {
            ChannelEvent::ContentChange(c) => Some(BroadcastEvent::ContentChange(c.clone())),
            ChannelEvent::CursorUpdate(c) => Some(BroadcastEvent::CursorUpdate(c.clone())),
            ChannelEvent::TypingUpdate(t) => Some(BroadcastEvent::TypingUpdate(t.clone())),
            _ => None,
        }
    }
}

impl From<BroadcastEvent> for ChannelEvent {
    fn from(event: BroadcastEvent) -> Self {
        match event {
            BroadcastEvent::ContentChange(c) => ChannelEvent::ContentChange(c),
            BroadcastEvent::CursorUpdate(c) => ChannelEvent::CursorUpdate(c),
            BroadcastEvent::TypingUpdate(t) => ChannelEvent::TypingUpdate(t),
        }
    }
}

/// Frames a WebSocket client sends to the bridge
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ClientFrame {
    Track { presence: PresenceState },
    Broadcast { payload: BroadcastEvent },
}

impl ClientFrame {
    pub fn parse(text: &str, max_content_bytes: usize) -> Result<Self, CollabError> {
        let frame: ClientFrame = serde_json::from_str(text)?;
        match &frame {
            ClientFrame::Track { presence } if presence.user_id.trim().is_empty() => {
                return Err(CollabError::InvalidMessage("presence without user_id".to_string()));
            }
            ClientFrame::Broadcast { payload } => payload.validate(max_content_bytes)?,
            _ => {}
        }
        Ok(frame)
    }
}
