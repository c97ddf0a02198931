//! Application entry point for the `aruba-ingest` service.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Resolving API credentials once (file secrets or environment)
//! - Opening the PostgreSQL pool and creating the schema, unless `INGEST_DRY_RUN`
//! - Either running the families named in `INGEST_RUN_ONCE` and exiting, or serving
//!   the HTTP trigger routes via the `routes` gateway (EMBP pattern)
//!
//! # Environment Variables
//! - `ARUBA_BASE_URL` – Central API gateway (or `baseUrl` in the API secret)
//! - `DATABASE_URL` (optional) – overrides the DB credentials secret
//! - `INGEST_RUN_ONCE` (optional) – comma-separated families, or `all`
//! - `INGEST_DRY_RUN` (optional) – write to an in-memory store instead of Postgres
//! - `INGEST_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `INGEST_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::{bail, Result};
use axum::Router;
use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aruba_ingest::context::{connect_db, RunContext};
use aruba_ingest::secrets::{EnvSecrets, FileSecrets, SecretsProvider};
use aruba_ingest::{config, routes, schema, Config, MemoryStore, Orchestrator, PgStore, Store};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let secrets = secrets_provider(&cfg);
    let store = open_store(&cfg, secrets.as_ref()).await?;
    let ctx = RunContext::resolve(cfg.clone(), secrets.as_ref())?;
    let orchestrator = Orchestrator::new(ctx, store);

    if let Some(families) = &cfg.run_once {
        let summaries = orchestrator.run_many(families).await;
        let failed = summaries.iter().filter(|s| s.is_failed()).count();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        if failed > 0 {
            bail!("{failed} of {} runs failed", summaries.len());
        }
        return Ok(());
    }

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(orchestrator);

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

fn secrets_provider(cfg: &Config) -> Box<dyn SecretsProvider> {
    // ---
    if cfg.db_secret_file.is_some() || cfg.api_secret_file.is_some() {
        Box::new(FileSecrets::new(
            cfg.db_secret_file.clone(),
            cfg.api_secret_file.clone(),
        ))
    } else {
        Box::new(EnvSecrets::new())
    }
}

async fn open_store(cfg: &Config, secrets: &dyn SecretsProvider) -> Result<Arc<dyn Store>> {
    // ---
    if cfg.dry_run {
        tracing::warn!("INGEST_DRY_RUN set, rows go to an in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = connect_db(cfg, secrets)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;
    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(Arc::new(PgStore::new(pool, cfg.db_insert_batch_size as usize)))
}

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces on, `0|false|no` forces
///   off, anything else auto-detects the TTY
/// - Span events from `INGEST_SPAN_EVENTS`: `"full"` emits ENTER, EXIT and
///   CLOSE; `"enter_exit"` emits ENTER and EXIT; default is CLOSE only
/// - Level from `RUST_LOG` when set, else `INGEST_LOG_LEVEL` (default `info`)
///
/// Call once at startup, before any tracing macro fires.
fn init_tracing() {
    // ---
    let span_events = match env::var("INGEST_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("INGEST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
