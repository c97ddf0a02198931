//! Process-lifetime run context.
//!
//! Built once at startup: credentials are resolved here and never again, and
//! the token cache lives here so every run reuses the same bearer token.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::api::{ApiClient, AuthMode, TokenCache};
use crate::error::{ApiError, RunError};
use crate::secrets::{ApiCredentials, DbCredentials, SecretsProvider};
use crate::Config;

/// GreenLake SSO endpoint used by the new Central API gateways.
const GREENLAKE_TOKEN_URL: &str = "https://sso.common.cloud.hpe.com/as/token.oauth2";

// ---

#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<Config>,
    pub api: ApiCredentials,
    pub base_url: String,
    pub token_url: String,
    auth: Arc<TokenCache>,
}

impl RunContext {
    /// Resolve API credentials once and derive the auth mode.
    pub fn resolve(config: Config, secrets: &dyn SecretsProvider) -> Result<Self, RunError> {
        let api = secrets.get_api_credentials()?;
        Self::from_parts(config, api)
    }

    /// Build a context from already resolved credentials.
    pub fn from_parts(config: Config, api: ApiCredentials) -> Result<Self, RunError> {
        // ---
        let base_url = config
            .base_url
            .clone()
            .or_else(|| api.base_url.clone())
            .map(|u| u.trim_end_matches('/').to_owned())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RunError::Config("no API base URL configured".to_owned()))?;
        let token_url = resolve_token_url(&config, &api, &base_url);

        let mode = AuthMode::from_credentials(&api, &token_url);
        info!(mode = mode.name(), %base_url, "[context] api auth resolved");

        let buffer = Duration::from_secs(u64::from(config.token_expiry_buffer_secs));
        Ok(Self {
            auth: Arc::new(TokenCache::new(mode, buffer)),
            config: Arc::new(config),
            api,
            base_url,
            token_url,
        })
    }

    /// A fresh client for one run; pacing state starts clean, the token
    /// cache is shared.
    pub fn api_client(&self) -> Result<ApiClient, ApiError> {
        ApiClient::new(
            self.config.api_settings(&self.base_url),
            Arc::clone(&self.auth),
            self.api.customer_id.clone(),
        )
    }

    pub fn auth(&self) -> &Arc<TokenCache> {
        &self.auth
    }
}

/// Explicit setting first, then the secret's, then GreenLake SSO for
/// `api.central` hosts, then `{base}/oauth2/token`.
fn resolve_token_url(config: &Config, api: &ApiCredentials, base_url: &str) -> String {
    // ---
    config
        .oauth_token_url
        .clone()
        .or_else(|| api.oauth_token_url.clone())
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| {
            if base_url.contains("api.central") {
                GREENLAKE_TOKEN_URL.to_owned()
            } else {
                format!("{base_url}/oauth2/token")
            }
        })
}

/// Open the Postgres pool, from `DATABASE_URL` when set, else from the
/// resolved DB credentials.
pub async fn connect_db(config: &Config, secrets: &dyn SecretsProvider) -> anyhow::Result<PgPool> {
    // ---
    let pool_options = PgPoolOptions::new().max_connections(config.db_pool_max);

    if let Some(url) = &config.database_url {
        return Ok(pool_options.connect(url).await?);
    }

    let creds: DbCredentials = secrets.get_db_credentials()?;
    info!(host = %creds.host, database = %creds.database, "[context] connecting to database");
    let options = PgConnectOptions::new()
        .host(&creds.host)
        .port(creds.port)
        .username(&creds.user)
        .password(creds.password.expose_secret())
        .database(&creds.database);
    Ok(pool_options.connect_with(options).await?)
}
