//! Mapping-gap diagnostics.
//!
//! A gap is an expected API key that a payload variant did not carry at
//! all. Gaps are counted always; they are logged only when enabled, and at
//! most `log_limit` times per (table, column) so a missing field on every
//! row of a large page does not flood the log.

use std::collections::HashMap;

use tracing::debug;

use crate::models::EntityFamily;
use crate::table::Table;

/// A single observed gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingGap {
    pub family: EntityFamily,
    pub table: Table,
    pub column: &'static str,
}

#[derive(Debug, Default)]
pub struct GapReporter {
    log_enabled: bool,
    log_limit: u32,
    counts: HashMap<MappingGap, u64>,
}

impl GapReporter {
    pub fn new(log_enabled: bool, log_limit: u32) -> Self {
        Self {
            log_enabled,
            log_limit,
            counts: HashMap::new(),
        }
    }

    pub fn record(&mut self, gap: MappingGap) {
        // ---
        let count = self.counts.entry(gap).or_insert(0);
        *count += 1;

        if self.log_enabled && *count <= u64::from(self.log_limit) {
            debug!(
                family = %gap.family,
                table = %gap.table,
                column = gap.column,
                occurrence = *count,
                "[normalize] field_gap"
            );
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, table: Table, column: &str) -> u64 {
        self.counts
            .iter()
            .filter(|(gap, _)| gap.table == table && gap.column == column)
            .map(|(_, n)| *n)
            .sum()
    }
}
