use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::realtime::session::SessionOptions;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HS256 secret for join tokens. Without it the bridge trusts the `user_id` query parameter.
    pub auth_jwt_secret: Option<String>,

    /// How long a validated token stays cached
    #[serde(default = "default_auth_cache_ttl_secs")]
    pub auth_cache_ttl_secs: u64,

    /// Quiet window before a local snapshot is broadcast
    #[serde(default = "default_content_debounce_ms")]
    pub content_debounce_ms: u64,

    /// Idle time after which `is_typing=false` is broadcast
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,

    /// Delay before local broadcasting resumes after a remote patch
    #[serde(default = "default_remote_settle_ms")]
    pub remote_settle_ms: u64,

    /// Per-channel broadcast buffer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound on concurrently open channels in the hub
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Largest accepted content snapshot
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "dev" || env == "development"
    }

    pub fn auth_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_cache_ttl_secs)
    }

    /// Timing options handed to every collaborative session
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            content_debounce: Duration::from_millis(self.content_debounce_ms),
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
            remote_settle: Duration::from_millis(self.remote_settle_ms),
        }
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            auth_jwt_secret: None,
            auth_cache_ttl_secs: default_auth_cache_ttl_secs(),
            content_debounce_ms: default_content_debounce_ms(),
            typing_timeout_ms: default_typing_timeout_ms(),
            remote_settle_ms: default_remote_settle_ms(),
            channel_capacity: default_channel_capacity(),
            max_channels: default_max_channels(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_auth_cache_ttl_secs() -> u64 {
    60
}

fn default_content_debounce_ms() -> u64 {
    300
}

fn default_typing_timeout_ms() -> u64 {
    1000
}

fn default_remote_settle_ms() -> u64 {
    150
}

fn default_channel_capacity() -> usize {
    100
}

fn default_max_channels() -> usize {
    10_000
}

fn default_max_content_bytes() -> usize {
    1024 * 1024
}
