use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::models::{ChannelName, ClientFrame, ErrorResponse};
use crate::realtime::hub::LocalChannel;
use crate::realtime::RealtimeChannel;
use crate::services::auth_service::{get_auth_token, AuthIdentity};

#[derive(Deserialize)]
pub struct JoinQuery {
    token: Option<String>,
    user_id: Option<String>,
}

/// WebSocket handler bridging a client onto a hub channel
pub async fn websocket_handler(
    Path(channel): Path<String>,
    Query(query): Query<JoinQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let name: ChannelName = match channel.parse() {
        Ok(name) => name,
        Err(e) => {
            warn!("Rejected WebSocket connection: {}", e);
            return ErrorResponse::reply(StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let identity = match resolve_identity(&state, &headers, &query).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected WebSocket connection to {}: {}", name, e);
            return ErrorResponse::reply(StatusCode::UNAUTHORIZED, e).into_response();
        }
    };

    info!("New WebSocket connection to {} from {}", name, identity.user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, name, identity, state))
}

async fn resolve_identity(state: &AppState, headers: &HeaderMap, query: &JoinQuery) -> Result<AuthIdentity, String> {
    if state.auth.enabled() {
        let token = get_auth_token(headers, query.token.as_deref())?;
        return state.auth.check(&token, false).await;
    }

    // No secret configured: trust the caller (development only)
    query
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| AuthIdentity {
            user_id: id.to_string(),
            name: None,
            email: None,
        })
        .ok_or_else(|| "Missing user_id parameter".to_string())
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, name: ChannelName, identity: AuthIdentity, state: Arc<AppState>) {
    let topic = name.to_string();
    let max_content_bytes = state.config.max_content_bytes;

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Subscribe to the hub channel for this document
    let channel = state.hub.open(&topic, &identity.user_id);
    let (sink, mut events) = mpsc::unbounded_channel();
    if let Err(e) = channel.subscribe(sink) {
        error!("Failed to subscribe {} to {}: {}", identity.user_id, topic, e);
        return;
    }

    // Forward channel events to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode channel event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Listen to the client; the channel lives as long as this task
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_client_frame(&channel, &identity, &text, max_content_bytes),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    info!("WebSocket connection to {} terminated", topic);
}

fn handle_client_frame(channel: &LocalChannel, identity: &AuthIdentity, text: &str, max_content_bytes: usize) {
    let frame = match ClientFrame::parse(text, max_content_bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Rejected frame on {} from {}: {}", channel.name(), identity.user_id, e);
            return;
        }
    };

    match frame {
        ClientFrame::Track { presence } => {
            if presence.user_id != identity.user_id {
                warn!("{} tried to track presence as {} on {}", identity.user_id, presence.user_id, channel.name());
                return;
            }
            debug!("Tracking {} on {}", identity.user_id, channel.name());
            if let Err(e) = channel.track(presence) {
                error!("Failed to track presence on {}: {}", channel.name(), e);
            }
        }
        ClientFrame::Broadcast { payload } => {
            if payload.user_id() != identity.user_id {
                warn!("{} tried to broadcast as {} on {}", identity.user_id, payload.user_id(), channel.name());
                return;
            }
            if let Err(e) = channel.send(payload) {
                error!("Failed to broadcast on {}: {}", channel.name(), e);
            }
        }
    }
}
