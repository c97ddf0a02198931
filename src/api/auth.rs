//! Bearer-token acquisition and caching.
//!
//! The auth mode is fixed when the cache is built: with a client id the
//! secret is exchanged for a token at the OAuth endpoint, without one the
//! secret already *is* the token. Exchanged tokens are cached until shortly
//! before they expire.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::secrets::ApiCredentials;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;

/// Upper bound on a cached token's lifetime, whatever the server claims.
const MAX_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

// ---

#[derive(Debug, Clone)]
pub enum AuthMode {
    /// OAuth2 client-credentials exchange.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: SecretString,
    },
    /// Pre-issued token used as is.
    Bearer(SecretString),
}

impl AuthMode {
    /// Decide the mode from resolved credentials. A blank client id selects
    /// bearer fallback.
    pub fn from_credentials(creds: &ApiCredentials, token_url: &str) -> Self {
        // ---
        match creds.client_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => AuthMode::ClientCredentials {
                token_url: token_url.to_owned(),
                client_id: id.to_owned(),
                client_secret: creds.client_secret.clone(),
            },
            _ => AuthMode::Bearer(creds.client_secret.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::ClientCredentials { .. } => "client_credentials",
            AuthMode::Bearer(_) => "bearer",
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Process-lifetime token cache shared by every run.
#[derive(Debug)]
pub struct TokenCache {
    mode: AuthMode,
    expiry_buffer: Duration,
    token: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(mode: AuthMode, expiry_buffer: Duration) -> Self {
        Self {
            mode,
            expiry_buffer,
            token: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Current bearer token, exchanging credentials if none is cached or the
    /// cached one is about to expire.
    pub async fn bearer(&self, http: &Client) -> Result<SecretString, ApiError> {
        // ---
        let (token_url, client_id, client_secret) = match &self.mode {
            AuthMode::Bearer(token) => return Ok(token.clone()),
            AuthMode::ClientCredentials {
                token_url,
                client_id,
                client_secret,
            } => (token_url, client_id, client_secret),
        };

        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        let (value, ttl) = exchange(http, token_url, client_id, client_secret).await?;
        info!(ttl_secs = ttl, "[auth] token acquired");

        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: expiry(Instant::now(), ttl, self.expiry_buffer),
        });
        Ok(value)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        debug!("[auth] token invalidated");
        *self.token.write().await = None;
    }
}

/// When a token issued at `now` with `ttl_secs` should be refreshed.
fn expiry(now: Instant, ttl_secs: u64, buffer: Duration) -> Instant {
    // ---
    let ttl = ttl_secs.min(MAX_TOKEN_TTL_SECS);
    let lifetime = Duration::from_secs(ttl).saturating_sub(buffer);
    now.checked_add(lifetime).unwrap_or(now)
}

async fn exchange(
    http: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &SecretString,
) -> Result<(SecretString, u64), ApiError> {
    // ---
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret.expose_secret()),
    ];
    let first = http.post(token_url).form(&form).send().await;
    match read_token(first).await {
        Ok(token) => return Ok(token),
        Err(reason) => warn!(%reason, "[auth] form exchange failed, retrying with basic auth"),
    }

    let second = http
        .post(token_url)
        .basic_auth(client_id, Some(client_secret.expose_secret()))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await;
    read_token(second)
        .await
        .map_err(|message| ApiError::Auth { message })
}

async fn read_token(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<(SecretString, u64), String> {
    // ---
    let response = response.map_err(|e| format!("token request failed: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("token endpoint returned {status}: {body}"));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| format!("token response is not JSON: {e}"))?;

    match parsed.access_token {
        Some(token) if !token.is_empty() => Ok((
            SecretString::from(token),
            parsed.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        )),
        _ => Err("token response has no access_token".to_owned()),
    }
}
