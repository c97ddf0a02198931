//! Error types for the ingestion pipeline.
//!
//! Each stage has its own error enum; [`RunError`] is what the orchestrator
//! sees and reports. Missing optional fields are not errors at all: the
//! normalizer records them as mapping gaps and keeps going.

use std::time::Duration;

use thiserror::Error;

use crate::table::Table;

/// Failures of the remote API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential exchange failed. Fatal for the run, never retried.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The API signalled throttling (HTTP 429).
    #[error("rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// Connection refused, DNS failure, timeout and the like.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Body was not valid JSON.
    #[error("invalid JSON from {url}: {message}")]
    Decode { url: String, message: String },

    /// A retryable failure persisted past the attempt bound.
    #[error("request to {url} failed after {attempts} attempts: {last}")]
    Fetch {
        url: String,
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },
}

impl ApiError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Http { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Failures of the write-policy sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The database rejected a table batch.
    #[error("write to {table} failed: {source}")]
    Write {
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    /// A child row references a parent key that is not stored.
    #[error("{table}.{column} references missing {parent} key '{key}'")]
    ForeignKey {
        table: Table,
        column: &'static str,
        parent: Table,
        key: String,
    },

    /// A row lacks the natural key its table upserts on.
    #[error("{table} row has no value for key column {column}")]
    MissingKey { table: Table, column: &'static str },

    /// Upsert requested for a table without a natural key.
    #[error("{table} has no natural key to upsert on")]
    NoConflictKey { table: Table },

    #[error("in-memory store lock poisoned")]
    LockPoisoned,

    /// Write refused by an injected failure (in-memory store only).
    #[error("write to {table} rejected")]
    Rejected { table: Table },
}

impl SinkError {
    pub fn write(table: Table, source: sqlx::Error) -> Self {
        Self::Write { table, source }
    }

    pub fn table(&self) -> Option<Table> {
        match self {
            Self::Write { table, .. }
            | Self::ForeignKey { table, .. }
            | Self::MissingKey { table, .. }
            | Self::NoConflictKey { table }
            | Self::Rejected { table } => Some(*table),
            Self::LockPoisoned => None,
        }
    }
}

/// Failures resolving credentials.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secret value {0} is not set")]
    Missing(String),

    #[error("failed to read secret {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("secret {name} is malformed: {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that ends an entity family's run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RunError {
    /// Stable error-kind label for run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Api(ApiError::Auth { .. }) => "AuthError",
            Self::Api(ApiError::RateLimited { .. }) => "RateLimited",
            Self::Api(_) => "FetchError",
            Self::Sink(_) => "WriteError",
            Self::Secrets(_) => "SecretsError",
            Self::Config(_) => "ConfigError",
        }
    }
}
