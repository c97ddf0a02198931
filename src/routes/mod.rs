use axum::Router;

use crate::pipeline::Orchestrator;

mod health;
mod ingest;

// ---

pub fn router(orchestrator: Orchestrator) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(health::router())
        .with_state(orchestrator)
}
