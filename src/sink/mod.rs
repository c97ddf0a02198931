//! Write-policy sink.
//!
//! [`Sink`] applies a table's [`WritePolicy`] and enforces parent-before-child
//! ordering across a [`RowBatch`]; the actual storage sits behind the
//! [`Store`] trait (Postgres in production, memory for dry runs and tests).

mod memory;
mod postgres;

use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::SinkError;
use crate::row::{Row, RowBatch};
use crate::table::{Table, WritePolicy};

pub use memory::{MemoryStore, StoredRow};
pub use postgres::PgStore;

// ---

/// Outcome counts for one `persist` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl WriteSummary {
    pub fn persisted(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
    }
}

/// Storage backend. Each call writes one table's rows atomically.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert rows, or overwrite every non-key column of the row whose
    /// `key` matches. `rows` carry unique keys.
    async fn upsert_on_key(
        &self,
        table: Table,
        key: &'static str,
        rows: &[Row],
    ) -> Result<WriteSummary, SinkError>;

    /// Unconditionally insert rows.
    async fn append(&self, table: Table, rows: &[Row]) -> Result<WriteSummary, SinkError>;
}

/// Result of persisting a multi-table batch. Tables after a failure are
/// counted as skipped and never written.
#[derive(Debug, Default)]
pub struct PersistOutcome {
    pub tables: BTreeMap<Table, WriteSummary>,
    pub error: Option<SinkError>,
}

impl PersistOutcome {
    pub fn persisted(&self) -> u64 {
        self.tables.values().map(WriteSummary::persisted).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.tables.values().map(|s| s.skipped).sum()
    }
}

#[derive(Clone)]
pub struct Sink {
    store: Arc<dyn Store>,
}

impl Sink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Write one table's rows under `policy`.
    pub async fn persist(
        &self,
        table: Table,
        rows: &[Row],
        policy: WritePolicy,
    ) -> Result<WriteSummary, SinkError> {
        // ---
        if rows.is_empty() {
            return Ok(WriteSummary::default());
        }

        let summary = match policy {
            WritePolicy::AppendOnly => self.store.append(table, rows).await?,
            WritePolicy::UpsertOnKey => {
                let key = table
                    .conflict_key()
                    .ok_or(SinkError::NoConflictKey { table })?;
                let (unique, skipped) = dedupe_by_key(rows, key);
                let mut summary = self.store.upsert_on_key(table, key, &unique).await?;
                summary.skipped += skipped;
                summary
            }
        };

        debug!(
            %table,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "[sink] persisted"
        );
        Ok(summary)
    }

    /// Write every table of `batch`, parents first. The first failing table
    /// stops the batch: it and every later table are reported as skipped.
    pub async fn persist_batch(&self, batch: &RowBatch) -> PersistOutcome {
        // ---
        let mut outcome = PersistOutcome::default();

        for (&table, rows) in batch {
            let entry = outcome.tables.entry(table).or_default();
            if outcome.error.is_some() {
                entry.skipped += rows.len() as u64;
                continue;
            }

            match self.persist(table, rows, table.policy()).await {
                Ok(summary) => *entry += summary,
                Err(e) => {
                    error!(%table, rows = rows.len(), error = %e, "[sink] batch rejected");
                    entry.skipped += rows.len() as u64;
                    outcome.error = Some(e);
                }
            }
        }
        outcome
    }
}

/// Keep the last row per key. Earlier duplicates and keyless rows count as
/// skipped.
fn dedupe_by_key(rows: &[Row], key: &str) -> (Vec<Row>, u64) {
    // ---
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for row in rows {
        let Some(value) = row.text(key) else {
            skipped += 1;
            continue;
        };
        match position.get(value) {
            Some(&i) => {
                unique[i] = row.clone();
                skipped += 1;
            }
            None => {
                position.insert(value, unique.len());
                unique.push(row.clone());
            }
        }
    }
    (unique, skipped)
}
