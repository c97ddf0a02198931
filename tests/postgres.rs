//! Store behaviour against a live Postgres.
//!
//! Ignored by default. Run with a scratch database:
//! `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use aruba_ingest::row::{Cell, Row};
use aruba_ingest::schema::create_schema;
use aruba_ingest::sink::{PgStore, Sink, Store};
use aruba_ingest::table::{Table, WritePolicy};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row as _};

// ---

async fn pool() -> Result<PgPool> {
    let url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

fn ap(serial: &str, status: &str) -> Row {
    let mut row = Row::new(Table::Ap);
    row.set("serial", Cell::Text(Some(serial.to_owned())));
    row.set("status", Cell::Text(Some(status.to_owned())));
    row
}

/// Stored AP columns except the ingestion timestamps, plus those timestamps.
async fn stored_ap(pool: &PgPool, serial: &str) -> Result<Vec<PgRow>> {
    let rows = sqlx::query(
        r#"SELECT (to_jsonb(a) - 'created_at' - 'updated_at')::text AS body, created_at, updated_at
           FROM "ap" a WHERE "serial" = $1"#,
    )
    .bind(serial)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

fn radio(serial: &str, index: i32) -> Row {
    let mut row = Row::new(Table::ApRadio);
    row.set("ap_serial", Cell::Text(Some(serial.to_owned())));
    row.set("radio_index", Cell::Int(Some(index)));
    row
}

#[tokio::test]
#[ignore]
async fn ap_upsert_is_idempotent() -> Result<()> {
    // ---
    let pool = pool().await?;
    let serial = format!("TEST-{}", uuid::Uuid::new_v4().simple());
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone(), 500));
    let sink = Sink::new(store);

    let first = sink.persist(Table::Ap, &[ap(&serial, "UP")], WritePolicy::UpsertOnKey).await?;
    assert_eq!(first.inserted, 1);
    let before = stored_ap(&pool, &serial).await?;
    assert_eq!(before.len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = sink.persist(Table::Ap, &[ap(&serial, "UP")], WritePolicy::UpsertOnKey).await?;
    assert_eq!(second.updated, 1);
    assert_eq!(second.inserted, 0);

    let after = stored_ap(&pool, &serial).await?;
    assert_eq!(after.len(), 1);
    let body = |row: &PgRow| row.try_get::<String, _>("body");
    let created = |row: &PgRow| row.try_get::<DateTime<Utc>, _>("created_at");
    let updated = |row: &PgRow| row.try_get::<DateTime<Utc>, _>("updated_at");
    assert_eq!(body(&after[0])?, body(&before[0])?);
    assert_eq!(created(&after[0])?, created(&before[0])?);
    assert!(updated(&after[0])? > updated(&before[0])?);

    sqlx::query(r#"DELETE FROM "ap" WHERE "serial" = $1"#)
        .bind(&serial)
        .execute(&pool)
        .await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn orphan_children_are_rejected_atomically() -> Result<()> {
    // ---
    let pool = pool().await?;
    let serial = format!("TEST-{}", uuid::Uuid::new_v4().simple());
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone(), 500));
    let sink = Sink::new(store);

    let orphan = sink
        .persist(Table::ApRadio, &[radio(&serial, 0), radio(&serial, 1)], WritePolicy::AppendOnly)
        .await;
    assert!(orphan.is_err());

    sink.persist(Table::Ap, &[ap(&serial, "UP")], WritePolicy::UpsertOnKey).await?;
    for _ in 0..2 {
        sink.persist(Table::ApRadio, &[radio(&serial, 0), radio(&serial, 1)], WritePolicy::AppendOnly)
            .await?;
    }

    let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "ap_radio" WHERE "ap_serial" = $1"#)
        .bind(&serial)
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 4);

    sqlx::query(r#"DELETE FROM "ap_radio" WHERE "ap_serial" = $1"#)
        .bind(&serial)
        .execute(&pool)
        .await?;
    sqlx::query(r#"DELETE FROM "ap" WHERE "serial" = $1"#)
        .bind(&serial)
        .execute(&pool)
        .await?;
    Ok(())
}
