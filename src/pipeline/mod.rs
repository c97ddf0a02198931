//! Run orchestrator.
//!
//! One [`Orchestrator::run`] call is one sequential pass for one entity
//! family: fetch a page, normalize it, persist it, repeat. Pages already
//! persisted stay persisted when a later page fails. Runs never share state
//! except the process-wide [`RunContext`].

mod families;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, info_span, Instrument};

use crate::context::RunContext;
use crate::error::RunError;
use crate::models::{EntityFamily, RunFailure, RunState, RunSummary};
use crate::normalize::Normalizer;
use crate::sink::{Sink, Store};

// ---

#[derive(Clone)]
pub struct Orchestrator {
    ctx: RunContext,
    sink: Sink,
}

impl Orchestrator {
    pub fn new(ctx: RunContext, store: Arc<dyn Store>) -> Self {
        Self {
            ctx,
            sink: Sink::new(store),
        }
    }

    /// Run one entity family to completion or failure. Never panics on
    /// pipeline errors: the outcome is always a [`RunSummary`].
    pub async fn run(&self, family: EntityFamily) -> RunSummary {
        // ---
        let mut run = Run::new(family, &self.ctx);
        let span = info_span!("ingest", family = %family, run_id = %run.summary.run_id);

        async move {
            info!("[run] start");
            let result = match self.ctx.api_client() {
                Ok(api) => {
                    run.transition(RunState::Fetching);
                    match family {
                        EntityFamily::Clients => self.run_clients(&api, &mut run).await,
                        EntityFamily::DeviceStatus => self.run_device_status(&api, &mut run).await,
                        EntityFamily::AccessPoints => self.run_access_points(&api, &mut run).await,
                        EntityFamily::SwitchInterfaces => {
                            self.run_switch_interfaces(&api, &mut run).await
                        }
                    }
                }
                Err(e) => Err(e.into()),
            };
            run.finish(result)
        }
        .instrument(span)
        .await
    }

    /// Run several families one after another. A failure in one does not
    /// stop the others.
    pub async fn run_many(&self, families: &[EntityFamily]) -> Vec<RunSummary> {
        let mut summaries = Vec::with_capacity(families.len());
        for &family in families {
            summaries.push(self.run(family).await);
        }
        summaries
    }
}

/// Mutable state of one run.
struct Run {
    summary: RunSummary,
    normalizer: Normalizer,
    started: Instant,
}

impl Run {
    fn new(family: EntityFamily, ctx: &RunContext) -> Self {
        Self {
            summary: RunSummary::new(family),
            normalizer: Normalizer::new(&ctx.config.normalize_options(), Utc::now()),
            started: Instant::now(),
        }
    }

    fn family(&self) -> EntityFamily {
        self.summary.family
    }

    fn transition(&mut self, next: RunState) {
        // ---
        let current = self.summary.state;
        if current == RunState::Failed || current == next {
            return;
        }
        debug!(from = ?current, to = ?next, "[run] state");
        self.summary.state = next;
    }

    /// Count a non-fatal item failure.
    fn item_error(&mut self) {
        self.summary.errors += 1;
    }

    /// Count raw entities dropped before normalization (in-run duplicates).
    fn dropped(&mut self, n: u64) {
        self.summary.fetched += n;
        self.summary.skipped += n;
    }

    /// Normalize and persist one page of raw entities.
    async fn ingest(&mut self, sink: &Sink, items: &[Value]) -> Result<(), RunError> {
        // ---
        if items.is_empty() {
            return Ok(());
        }
        self.summary.fetched += items.len() as u64;

        self.transition(RunState::Normalizing);
        let page = self.normalizer.normalize(items, self.family());
        self.summary.normalized += page.row_count();
        self.summary.skipped += page.skipped;

        self.transition(RunState::Persisting);
        let outcome = sink.persist_batch(&page.rows).await;
        self.summary.persisted += outcome.persisted();
        self.summary.skipped += outcome.skipped();
        for (table, written) in &outcome.tables {
            *self.summary.tables.entry(table.name()).or_default() += *written;
        }

        if let Some(e) = outcome.error {
            return Err(e.into());
        }
        self.transition(RunState::Fetching);
        Ok(())
    }

    fn finish(mut self, result: Result<(), RunError>) -> RunSummary {
        // ---
        self.summary.mapping_gaps = self.normalizer.gaps().total();
        self.summary.duration_ms = self.started.elapsed().as_millis() as u64;

        let summary = &mut self.summary;
        match result {
            Ok(()) => {
                summary.state = RunState::Done;
                info!(
                    fetched = summary.fetched,
                    normalized = summary.normalized,
                    persisted = summary.persisted,
                    skipped = summary.skipped,
                    errors = summary.errors,
                    mapping_gaps = summary.mapping_gaps,
                    duration_ms = summary.duration_ms,
                    "[run] done"
                );
            }
            Err(e) => {
                summary.errors += 1;
                summary.failure = Some(RunFailure {
                    stage: summary.state,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                summary.state = RunState::Failed;
                error!(
                    kind = e.kind(),
                    error = %e,
                    fetched = summary.fetched,
                    persisted = summary.persisted,
                    "[run] failed"
                );
            }
        }
        self.summary
    }
}
