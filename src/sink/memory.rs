//! In-memory [`Store`] used for dry runs and tests.
//!
//! Enforces the same constraints as the Postgres schema that matter to the
//! pipeline: the AP natural key is unique and child rows must reference a
//! stored AP. Each call is all-or-nothing.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, WriteSummary};
use crate::error::SinkError;
use crate::row::Row;
use crate::table::Table;

/// A stored row plus its ingestion timestamps.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub row: Row,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<Table, Vec<StoredRow>>,
    failing: HashSet<Table>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, SinkError> {
        self.state.lock().map_err(|_| SinkError::LockPoisoned)
    }

    /// Make every later write to `table` fail.
    pub fn fail_writes_to(&self, table: Table) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(table);
        }
    }

    pub fn rows(&self, table: Table) -> Vec<StoredRow> {
        self.lock()
            .map(|state| state.tables.get(&table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn count(&self, table: Table) -> usize {
        self.lock()
            .map(|state| state.tables.get(&table).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

// ---

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_on_key(
        &self,
        table: Table,
        key: &'static str,
        rows: &[Row],
    ) -> Result<WriteSummary, SinkError> {
        // ---
        let mut state = self.lock()?;
        if state.failing.contains(&table) {
            return Err(SinkError::Rejected { table });
        }
        if rows.iter().any(|r| r.text(key).is_none()) {
            return Err(SinkError::MissingKey { table, column: key });
        }

        let now = Utc::now();
        let stored = state.tables.entry(table).or_default();
        let mut summary = WriteSummary::default();

        for row in rows {
            let existing = stored
                .iter_mut()
                .find(|s| s.row.text(key) == row.text(key));
            match existing {
                Some(slot) => {
                    slot.row = row.clone();
                    slot.updated_at = now;
                    summary.updated += 1;
                }
                None => {
                    stored.push(StoredRow {
                        row: row.clone(),
                        created_at: now,
                        updated_at: now,
                    });
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn append(&self, table: Table, rows: &[Row]) -> Result<WriteSummary, SinkError> {
        // ---
        let mut state = self.lock()?;
        if state.failing.contains(&table) {
            return Err(SinkError::Rejected { table });
        }

        if let Some(fk) = table.foreign_key() {
            let parents: HashSet<String> = state
                .tables
                .get(&fk.parent)
                .into_iter()
                .flatten()
                .filter_map(|s| s.row.text(fk.references).map(str::to_owned))
                .collect();

            for row in rows {
                let value = row.text(fk.column).unwrap_or_default();
                if !parents.contains(value) {
                    return Err(SinkError::ForeignKey {
                        table,
                        column: fk.column,
                        parent: fk.parent,
                        key: value.to_owned(),
                    });
                }
            }
        }

        let now = Utc::now();
        let stored = state.tables.entry(table).or_default();
        stored.extend(rows.iter().map(|row| StoredRow {
            row: row.clone(),
            created_at: now,
            updated_at: now,
        }));

        Ok(WriteSummary {
            inserted: rows.len() as u64,
            ..WriteSummary::default()
        })
    }
}
