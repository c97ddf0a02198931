// src/routes/health.rs
//! Liveness endpoint for the ingestion service.
//!
//! Sibling module in the `routes` directory, following the Explicit Module
//! Boundary Pattern (EMBP):
//! - Internal to this file: the handler and its response type
//! - Exports to the gateway (`mod.rs`): a subrouter with the `/health` route

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// Handle `GET /health`. Touches neither the database nor the upstream API.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
    })
}

/// Subrouter with `GET /health`, generic over the gateway's state type.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
