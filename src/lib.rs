//! Presence and content broadcast for collaborative editing.
//!
//! The [`realtime`] module holds the client side: a [`CollabSession`] binds an
//! editor to a named channel, tracks who else is present and keeps the text in
//! sync. The server side is an in-process [`LocalHub`] exposed over WebSocket by
//! [`app`].

pub mod config;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod utils;
pub mod websocket;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use config::Config;
pub use error::{CollabError, Result};
pub use models::{ChannelName, CurrentUser, PresenceState};
pub use realtime::{
    CollabSession, ConnectionState, EditorSurface, LocalHub, SessionHandle, SessionOptions, TextBuffer,
    WsTransport,
};
pub use services::AuthCache;

/// Shared by every handler
pub struct AppState {
    pub config: Config,
    pub hub: LocalHub,
    pub auth: AuthCache,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = LocalHub::new(config.channel_capacity, config.max_channels);
        let auth = AuthCache::new(config.auth_jwt_secret.clone(), config.auth_cache_ttl());
        if !auth.enabled() {
            warn!("No auth_jwt_secret configured, WebSocket clients are trusted by user_id");
        }
        Self { config, hub, auth }
    }
}

/// The full HTTP surface: REST API, WebSocket bridge and Swagger UI
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::<Arc<AppState>>::new()
        // WebSocket bridge onto the hub
        .route("/ws/:channel", get(websocket::websocket_handler))
        .with_state(state.clone())
        // Mount API routes
        .nest("/api", routes::create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", docs::ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return if config.is_development() {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        };
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_headers(Any)
}
