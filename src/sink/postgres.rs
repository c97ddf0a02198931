//! Postgres [`Store`]: batched multi-row statements, one transaction per
//! table call.

use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{Store, WriteSummary};
use crate::error::SinkError;
use crate::row::{Cell, Row};
use crate::table::Table;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Rows per statement for `table`, within the bind-parameter limit.
    fn chunk_size(&self, table: Table) -> usize {
        let per_row = table.columns().len().max(1);
        self.batch_size.min(MAX_BIND_PARAMS / per_row).max(1)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_on_key(
        &self,
        table: Table,
        key: &'static str,
        rows: &[Row],
    ) -> Result<WriteSummary, SinkError> {
        // ---
        let fail = |e| SinkError::write(table, e);
        let mut tx = self.pool.begin().await.map_err(fail)?;
        let mut summary = WriteSummary::default();

        for chunk in rows.chunks(self.chunk_size(table)) {
            let mut qb = insert_values(table, chunk);
            qb.push(" ON CONFLICT (");
            qb.push(quote(key));
            qb.push(") DO UPDATE SET ");

            let mut set = qb.separated(", ");
            for column in table.columns().iter().filter(|c| c.name != key) {
                let name = quote(column.name);
                set.push(format!("{name} = EXCLUDED.{name}"));
            }
            set.push("updated_at = now()");

            // xmax is zero only for freshly inserted tuples.
            qb.push(" RETURNING (xmax = 0) AS inserted");

            let flags: Vec<bool> = qb
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await
                .map_err(fail)?;
            for inserted in flags {
                if inserted {
                    summary.inserted += 1;
                } else {
                    summary.updated += 1;
                }
            }
        }

        tx.commit().await.map_err(fail)?;
        Ok(summary)
    }

    async fn append(&self, table: Table, rows: &[Row]) -> Result<WriteSummary, SinkError> {
        // ---
        let fail = |e| SinkError::write(table, e);
        let mut tx = self.pool.begin().await.map_err(fail)?;
        let mut summary = WriteSummary::default();

        for chunk in rows.chunks(self.chunk_size(table)) {
            let result = insert_values(table, chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
            summary.inserted += result.rows_affected();
        }

        tx.commit().await.map_err(fail)?;
        Ok(summary)
    }
}

/// `INSERT INTO "table" ("c1", ...) VALUES (...), (...)`
fn insert_values<'a>(table: Table, rows: &'a [Row]) -> QueryBuilder<'a, Postgres> {
    // ---
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", quote(table.name())));
    let mut columns = qb.separated(", ");
    for column in table.columns() {
        columns.push(quote(column.name));
    }
    qb.push(") ");

    qb.push_values(rows, |mut values, row| {
        for cell in row.cells() {
            bind_cell(&mut values, cell);
        }
    });
    qb
}

fn bind_cell<'q>(values: &mut Separated<'_, 'q, Postgres, &'static str>, cell: &Cell) {
    // ---
    match cell {
        Cell::Text(v) => values.push_bind(v.clone()),
        Cell::SmallInt(v) => values.push_bind(*v),
        Cell::Int(v) => values.push_bind(*v),
        Cell::BigInt(v) => values.push_bind(*v),
        Cell::Timestamp(v) => values.push_bind(*v),
    };
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_insert_statement_shape() {
        // ---
        let rows = vec![Row::new(Table::ApModem), Row::new(Table::ApModem)];
        let qb = insert_values(Table::ApModem, &rows);
        let sql = qb.sql();

        assert!(sql.starts_with(r#"INSERT INTO "ap_modem" ("ap_serial", "manufacturer", "sim_state""#));
        assert!(sql.contains("($1, $2,"));
        assert!(sql.contains("$26)"));
    }

    #[test]
    fn test_quote_preserves_camel_case() {
        // ---
        assert_eq!(quote("lastSeenAt"), "\"lastSeenAt\"");
        assert_eq!(quote("_site_id"), "\"_site_id\"");
    }

    #[tokio::test]
    async fn test_chunk_size_respects_bind_limit() {
        // ---
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let store = PgStore::new(pool, 5000);
        assert_eq!(store.chunk_size(Table::SwitchInterface), 65_535 / 54);
        assert_eq!(store.chunk_size(Table::ApModem), 5000);

        let small = PgStore::new(store.pool().clone(), 0);
        assert_eq!(small.chunk_size(Table::Ap), 1);
    }
}
