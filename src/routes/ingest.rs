// src/routes/ingest.rs
//! On-demand ingestion trigger.
//!
//! `POST /ingest/{family}` runs one entity family to completion and returns
//! its [`RunSummary`](crate::models::RunSummary). Runs execute inside the
//! request, so a slow upstream holds the connection open; schedulers call
//! this route the same way the one-shot CLI mode calls the orchestrator.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::EntityFamily;
use crate::pipeline::Orchestrator;

// ---

#[derive(Serialize)]
struct UnknownFamily {
    error: &'static str,
    family: String,
    expected: Vec<&'static str>,
}

pub fn router() -> Router<Orchestrator> {
    // ---
    Router::new().route("/ingest/{family}", post(handler))
}

async fn handler(
    Path(family): Path<String>,
    State(orchestrator): State<Orchestrator>,
) -> impl IntoResponse {
    // ---
    let family: EntityFamily = match family.parse() {
        Ok(f) => f,
        Err(_) => {
            warn!(%family, "POST /ingest - unknown family");
            let body = UnknownFamily {
                error: "unknown entity family",
                family,
                expected: EntityFamily::ALL.iter().map(|f| f.as_str()).collect(),
            };
            return (StatusCode::NOT_FOUND, Json(body)).into_response();
        }
    };

    info!(%family, "POST /ingest - starting run");
    let summary = orchestrator.run(family).await;

    let status = if summary.is_failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(summary)).into_response()
}
