use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::future::Cache;
use std::time::Duration;
use tracing::{debug, info};

/// Who a join token belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

// Get the auth token from the Authorization header, the auth_token cookie or the query
pub fn get_auth_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = headers.get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
    }

    // 3. Browsers cannot set headers on WebSocket upgrades, so accept ?token=
    query_token
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "Missing Authorization header, auth_token cookie or token parameter".to_string())
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

fn identity_from_claims(claims: &serde_json::Value) -> Result<AuthIdentity, String> {
    let user_id = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "JWT token does not contain 'sub' claim".to_string())?;
    let text = |key: &str| claims.get(key).and_then(|v| v.as_str()).map(str::to_string);

    Ok(AuthIdentity {
        user_id: user_id.to_string(),
        name: text("name"),
        email: text("email"),
    })
}

/// Caches token checks for a fixed TTL. Owned by the application state and
/// injected where needed; `force` skips the cached result.
#[derive(Clone)]
pub struct AuthCache {
    cache: Cache<String, AuthIdentity>,
    secret: Option<String>,
    ttl: Duration,
}

impl AuthCache {
    pub fn new(secret: Option<String>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        info!("Auth cache initialized (ttl {:?})", ttl);
        Self { cache, secret, ttl }
    }

    /// Without a secret, tokens are not checked at all
    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn check(&self, token: &str, force: bool) -> Result<AuthIdentity, String> {
        if !force {
            if let Some(identity) = self.cache.get(token).await {
                debug!("Auth cache hit for {}", identity.user_id);
                return Ok(identity);
            }
        }

        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| "No JWT secret configured".to_string())?;
        let token_data = validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;
        let identity = identity_from_claims(&token_data.claims)?;

        info!("JWT token validated successfully for user: {}", identity.user_id);
        self.remember(token, identity.clone()).await;
        Ok(identity)
    }

    pub(crate) async fn remember(&self, token: &str, identity: AuthIdentity) {
        self.cache.insert(token.to_string(), identity).await;
    }
}
