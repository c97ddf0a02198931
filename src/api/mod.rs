//! Rate-limited client for the network-monitoring API.
//!
//! [`ApiClient`] owns pacing, retries and re-authentication; pagination is
//! exposed as a lazy stream of [`Page`]s so the orchestrator can persist
//! each page before asking for the next.

mod auth;
mod client;
mod throttle;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub use auth::{AuthMode, TokenCache};
pub use client::ApiClient;
pub use throttle::{backoff_delay, Throttle};

// ---

/// Transport settings for one client instance.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    /// Page `limit`; the API caps it at 100.
    pub page_size: u32,
    pub max_pages: u32,
    pub min_interval: Duration,
    pub max_backoff: Duration,
    /// Total attempts per request, first try included.
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            page_size: 100,
            max_pages: 60,
            min_interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Trailing window an entity must have been seen in.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub lookback: Duration,
}

impl Window {
    pub fn minutes(minutes: u32) -> Self {
        Self {
            lookback: Duration::from_secs(u64::from(minutes) * 60),
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lookback)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Query shaping for a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct PageFilters {
    /// Sent with the first request and every offset request.
    pub params: Vec<(String, String)>,
    /// Sent with every request, cursor follow-ups included.
    pub sticky: Vec<(String, String)>,
    /// Status values folded into the `filter` expression.
    pub statuses: Vec<String>,
    /// Body keys that may hold the item array, after `items`.
    pub root_keys: &'static [&'static str],
}

impl PageFilters {
    /// Add a first-request parameter when `value` is set.
    pub fn param(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.params.push((key.to_owned(), value.to_owned()));
        }
        self
    }

    pub fn sticky(mut self, key: &str, value: &str) -> Self {
        self.sticky.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn root_keys(mut self, keys: &'static [&'static str]) -> Self {
        self.root_keys = keys;
        self
    }
}

/// One non-empty page of raw entities.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based request number within the listing.
    pub number: u32,
    pub items: Vec<Value>,
}

/// Build the API `filter` expression, e.g.
/// `status in ('Connected','Failed') and lastSeenAt gt '2026-01-01T00:00:00Z'`.
pub fn filter_expression(statuses: &[String], since: Option<DateTime<Utc>>) -> Option<String> {
    // ---
    let mut clauses = Vec::new();
    if !statuses.is_empty() {
        let quoted: Vec<String> = statuses
            .iter()
            .map(|s| format!("'{}'", s.replace('\'', "")))
            .collect();
        clauses.push(format!("status in ({})", quoted.join(",")));
    }
    if let Some(since) = since {
        clauses.push(format!(
            "lastSeenAt gt '{}'",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    (!clauses.is_empty()).then(|| clauses.join(" and "))
}

/// Pull the entity array out of a response body.
///
/// Looks at `items`, then `root_keys`, then a `data` object (one entity),
/// then the first array-valued key. A bare array body is used as is.
pub fn extract_items(body: Value, root_keys: &[&str]) -> Vec<Value> {
    // ---
    let mut obj = match body {
        Value::Array(items) => return items,
        Value::Object(obj) => obj,
        _ => return Vec::new(),
    };

    for key in std::iter::once("items").chain(root_keys.iter().copied()) {
        if let Some(Value::Array(_)) = obj.get(key) {
            if let Some(Value::Array(items)) = obj.remove(key) {
                return items;
            }
        }
    }
    if let Some(Value::Object(_)) = obj.get("data") {
        return obj.remove("data").into_iter().collect();
    }
    let first_array = obj
        .iter()
        .find(|(_, v)| v.is_array())
        .map(|(k, _)| k.clone());
    match first_array.and_then(|k| obj.remove(&k)) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Cursor for the next page, if the body advertises one.
pub fn next_cursor(body: &Value) -> Option<String> {
    // ---
    ["next", "next_cursor"]
        .iter()
        .filter_map(|k| body.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_filter_expression() {
        // ---
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let statuses = vec!["Connected".to_owned(), "Failed".to_owned()];

        assert_eq!(
            filter_expression(&statuses, Some(since)).as_deref(),
            Some("status in ('Connected','Failed') and lastSeenAt gt '2026-01-01T00:00:00Z'")
        );
        assert_eq!(
            filter_expression(&[], Some(since)).as_deref(),
            Some("lastSeenAt gt '2026-01-01T00:00:00Z'")
        );
        assert_eq!(filter_expression(&[], None), None);
    }

    #[test]
    fn test_window_since() {
        // ---
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let since = Window::minutes(60).since(now);
        assert_eq!(since, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_extract_items_precedence() {
        // ---
        let body = json!({ "count": 1, "sites": [{ "id": 1 }], "items": [{ "id": 2 }] });
        assert_eq!(extract_items(body, &["sites"]), vec![json!({ "id": 2 })]);

        let body = json!({ "count": 1, "sites": [{ "id": 1 }] });
        assert_eq!(extract_items(body, &["sites"]), vec![json!({ "id": 1 })]);

        let body = json!({ "data": { "id": 3 } });
        assert_eq!(extract_items(body, &[]), vec![json!({ "data": { "id": 3 } })["data"].clone()]);

        let body = json!({ "total": 2, "whatever": [1, 2] });
        assert_eq!(extract_items(body, &[]).len(), 2);

        assert_eq!(extract_items(json!([{ "a": 1 }]), &[]).len(), 1);
        assert!(extract_items(json!({ "total": 0 }), &[]).is_empty());
        assert!(extract_items(Value::Null, &[]).is_empty());
    }

    #[test]
    fn test_next_cursor() {
        // ---
        assert_eq!(next_cursor(&json!({ "next": "abc" })).as_deref(), Some("abc"));
        assert_eq!(next_cursor(&json!({ "next": 200 })).as_deref(), Some("200"));
        assert_eq!(next_cursor(&json!({ "next_cursor": "c2" })).as_deref(), Some("c2"));
        assert_eq!(next_cursor(&json!({ "next": "" })), None);
        assert_eq!(next_cursor(&json!({ "next": null })), None);
    }
}
