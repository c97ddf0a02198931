//! `aruba-ingest`: pulls inventory and telemetry from the Aruba Central REST
//! API and lands it in relational tables.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! directory module exposes its public surface from `mod.rs`, and the binary
//! (`main.rs`) only talks to these gateways.
//!
//! Data flows one way through a run:
//! [`api`] (paced, paginated fetch) → [`normalize`] (raw JSON to typed
//! [`row::Row`]s) → [`sink`] (write policy per [`table::Table`]), driven by
//! [`pipeline::Orchestrator`].

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod routes;
pub mod row;
pub mod schema;
pub mod secrets;
pub mod sink;
pub mod table;

pub use config::Config;
pub use context::RunContext;
pub use error::{ApiError, RunError, SecretsError, SinkError};
pub use models::{EntityFamily, RunState, RunSummary};
pub use pipeline::Orchestrator;
pub use sink::{MemoryStore, PgStore, Store};
