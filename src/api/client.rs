use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{pin_mut, Stream, TryStreamExt};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    backoff_delay, extract_items, filter_expression, next_cursor, ApiSettings, Page, PageFilters,
    Throttle, TokenCache, Window,
};
use crate::error::ApiError;

// ---

/// HTTP client for one run. Shares the process-wide [`TokenCache`]; pacing
/// state is per instance.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    settings: ApiSettings,
    auth: Arc<TokenCache>,
    customer_id: Option<String>,
    throttle: Throttle,
}

impl ApiClient {
    pub fn new(
        settings: ApiSettings,
        auth: Arc<TokenCache>,
        customer_id: Option<String>,
    ) -> Result<Self, ApiError> {
        // ---
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self::with_http(http, settings, auth, customer_id))
    }

    pub fn with_http(
        http: Client,
        settings: ApiSettings,
        auth: Arc<TokenCache>,
        customer_id: Option<String>,
    ) -> Self {
        let throttle = Throttle::new(settings.min_interval);
        Self {
            http,
            settings,
            auth,
            customer_id,
            throttle,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_owned();
        }
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// GET one JSON document with pacing, bounded retries and a single
    /// re-authentication on 401.
    pub async fn get_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        // ---
        let url = self.url(endpoint);
        let max_attempts = self.settings.max_retries.max(1);
        let mut reauthenticated = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.throttle.wait().await;

            let token = self.auth.bearer(&self.http).await?;
            let mut request = self
                .http
                .get(&url)
                .query(params)
                .bearer_auth(token.expose_secret())
                .header(ACCEPT, "application/json");
            if let Some(customer_id) = &self.customer_id {
                request = request.header("X-Customer-Id", customer_id);
            }

            let err = match request.send().await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    if reauthenticated {
                        return Err(ApiError::Auth {
                            message: format!("{url} rejected the token after re-authentication"),
                        });
                    }
                    info!(%url, "[api] 401, re-authenticating");
                    reauthenticated = true;
                    self.auth.invalidate().await;
                    // The replay does not count against the retry bound.
                    attempt -= 1;
                    continue;
                }
                Ok(response) if response.status().is_success() => {
                    return decode(&url, response).await;
                }
                Ok(response) => status_error(&url, response).await,
                Err(e) => ApiError::Transport(e),
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(%url, attempts = attempt, error = %err, "[api] giving up");
                return Err(ApiError::Fetch {
                    url,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.retry_delay(&err, attempt).await;
            warn!(
                %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "[api] retrying"
            );
            sleep(delay).await;
        }
    }

    async fn retry_delay(&self, err: &ApiError, attempt: u32) -> Duration {
        // ---
        let max = self.settings.max_backoff;
        match err {
            ApiError::RateLimited { retry_after } => {
                self.throttle.penalize().await;
                match retry_after {
                    Some(after) => (*after).min(max),
                    None => backoff_delay(self.settings.min_interval * 2, attempt, max),
                }
            }
            _ => backoff_delay(self.settings.min_interval, attempt, max),
        }
    }

    /// Lazily page through a listing endpoint.
    ///
    /// The first request carries `limit` and the query; if its response has
    /// a `next` cursor the listing is followed by cursor, otherwise by
    /// `offset` until an empty or short page. Empty pages are not yielded.
    /// Stops early, with a warning, at `max_pages` requests.
    pub fn fetch_pages<'a>(
        &'a self,
        endpoint: &'a str,
        window: Option<Window>,
        filters: PageFilters,
    ) -> impl Stream<Item = Result<Page, ApiError>> + 'a {
        // ---
        try_stream! {
            let limit = self.settings.page_size.clamp(1, 100);

            let mut query = filters.params.clone();
            query.extend(filters.sticky.iter().cloned());
            let since = window.map(|w| w.since(chrono::Utc::now()));
            if let Some(filter) = filter_expression(&filters.statuses, since) {
                query.push(("filter".to_owned(), filter));
            }
            query.push(("limit".to_owned(), limit.to_string()));

            let mut cursor: Option<String> = None;
            let mut offset: usize = 0;
            let mut number: u32 = 0;

            loop {
                if number >= self.settings.max_pages {
                    warn!(endpoint, max_pages = self.settings.max_pages, "[api] page limit reached");
                    break;
                }
                number += 1;

                let params = match &cursor {
                    Some(next) => {
                        let mut p = filters.sticky.clone();
                        p.push(("next".to_owned(), next.clone()));
                        p
                    }
                    None if offset > 0 => {
                        let mut p = query.clone();
                        p.push(("offset".to_owned(), offset.to_string()));
                        p
                    }
                    None => query.clone(),
                };

                let body = self.get_json(endpoint, &params).await?;
                let next = next_cursor(&body);
                let items = extract_items(body, filters.root_keys);
                let count = items.len();
                debug!(endpoint, page = number, count, has_next = next.is_some(), "[api] page");

                if count == 0 {
                    break;
                }
                yield Page { number, items };

                match next {
                    Some(token) => cursor = Some(token),
                    None if cursor.is_some() => break,
                    None if count < limit as usize => break,
                    None => offset += count,
                }
            }
        }
    }

    /// Drain [`Self::fetch_pages`] into one list of entities.
    pub async fn fetch_all(
        &self,
        endpoint: &str,
        window: Option<Window>,
        filters: PageFilters,
    ) -> Result<Vec<Value>, ApiError> {
        // ---
        let pages = self.fetch_pages(endpoint, window, filters);
        pin_mut!(pages);

        let mut items = Vec::new();
        while let Some(page) = pages.try_next().await? {
            items.extend(page.items);
        }
        Ok(items)
    }
}

async fn decode(url: &str, response: Response) -> Result<Value, ApiError> {
    // ---
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Decode {
        url: url.to_owned(),
        message: e.to_string(),
    })
}

async fn status_error(url: &str, response: Response) -> ApiError {
    // ---
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return ApiError::RateLimited { retry_after };
    }

    let body = response.text().await.unwrap_or_default();
    ApiError::Http {
        status: status.as_u16(),
        url: url.to_owned(),
        body: body.chars().take(500).collect(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::api::AuthMode;
    use secrecy::SecretString;

    fn client(base_url: &str) -> ApiClient {
        let auth = Arc::new(TokenCache::new(
            AuthMode::Bearer(SecretString::from("t")),
            Duration::ZERO,
        ));
        let settings = ApiSettings {
            base_url: base_url.to_owned(),
            ..ApiSettings::default()
        };
        ApiClient::with_http(Client::new(), settings, auth, None)
    }

    #[test]
    fn test_url_joining() {
        // ---
        let c = client("https://api.example.com/");
        assert_eq!(
            c.url("/network-monitoring/v1alpha1/aps"),
            "https://api.example.com/network-monitoring/v1alpha1/aps"
        );
        assert_eq!(c.url("aps"), "https://api.example.com/aps");
        assert_eq!(c.url("http://other/x"), "http://other/x");
    }
}
