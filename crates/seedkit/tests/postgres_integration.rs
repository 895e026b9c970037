//! Integration tests for the PostgreSQL session.
//!
//! These tests verify end-to-end functionality including:
//! - History table creation and merge-on-conflict tracking
//! - Upserts typed through `jsonb_populate_record`, timestamps included
//! - Per-unit commit and rollback against a real transaction
//!
//! To run these tests, you need a PostgreSQL database and the DATABASE_URL
//! environment variable set.
//!
//! Run with: `DATABASE_URL=postgres://... cargo nextest run -p seedkit postgres`
//!
//! Note: every test creates its own uniquely named tables and drops them at
//! the end, so they can safely run against a development database.

use seedkit::prelude::*;
use seedkit::{UnitAction, UpsertManager};
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use uuid::Uuid;

/// Get database pool, skipping tests if DATABASE_URL is not set.
async fn get_test_pool() -> Option<PgPool> {
    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: DATABASE_URL not set");
            return None;
        }
    };

    match PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            eprintln!("Skipping test: Failed to connect to database: {e}");
            None
        }
    }
}

/// Creates a `(code UNIQUE, label, rank, starts_at)` table with a unique name.
async fn create_target_table(pool: &PgPool) -> String {
    let table = format!("seedkit_it_{}", &Uuid::new_v4().simple().to_string()[..12]);
    sqlx::query(&format!(
        r#"
        CREATE TABLE "{table}" (
            id    BIGSERIAL PRIMARY KEY,
            code  TEXT NOT NULL UNIQUE,
            label TEXT,
            rank  INTEGER,
            starts_at TIMESTAMPTZ
        )
        "#
    ))
    .execute(pool)
    .await
    .expect("Failed to create test table");
    table
}

async fn drop_tables(pool: &PgPool, tables: &[&str]) {
    for table in tables {
        let _ = sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{table}""#))
            .execute(pool)
            .await;
    }
}

struct CodesUnit {
    meta: SeedMetadata,
    table: String,
    codes: Vec<&'static str>,
    fail: bool,
}

#[async_trait]
impl SeedUnit for CodesUnit {
    fn metadata(&self) -> &SeedMetadata {
        &self.meta
    }

    fn run_source(&self) -> Option<&str> {
        Some("codes v1")
    }

    fn rollback_source(&self) -> Option<&str> {
        Some("delete codes")
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let rows: Vec<Row> = self
            .codes
            .iter()
            .enumerate()
            .map(|(rank, code)| row! { "code" => *code, "label" => code.to_uppercase(), "rank" => rank as i64 })
            .collect();
        ctx.bulk_upsert(&self.table, &rows, &["code"], None).await?;
        if self.fail {
            return Err(SeedError::msg("failing after writes"));
        }
        Ok(())
    }

    async fn rollback(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        for code in &self.codes {
            ctx.delete(&self.table, &row! { "code" => *code }).await?;
        }
        Ok(())
    }
}

async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM "{table}""#))
        .fetch_one(pool)
        .await
        .expect("Failed to count rows")
}

#[tokio::test]
async fn test_run_skip_and_rollback_against_postgres() {
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let target = create_target_table(&pool).await;
    let history = format!("{target}_history");

    let mut session = PgSession::new(pool.clone());
    session
        .ensure_history_table(&history)
        .await
        .expect("Failed to create history table");

    let mut registry = Registry::new();
    registry
        .register(CodesUnit {
            meta: SeedMetadata::new("Codes").can_rollback(true),
            table: target.clone(),
            codes: vec!["alpha", "beta"],
            fail: false,
        })
        .unwrap();
    registry
        .register(CodesUnit {
            meta: SeedMetadata::new("Broken"),
            table: target.clone(),
            codes: vec!["gamma"],
            fail: true,
        })
        .unwrap();
    let config = SeederConfig {
        tracking_table: history.clone(),
        ..Default::default()
    };
    let mut manager = SeedManager::new(session, registry, config);
    let options = RunOptions::new().environment("testing");

    let first = manager.run_all(&options).await.expect("first run failed");
    assert_eq!(first.names_with(UnitAction::Executed), vec!["Codes"]);
    assert_eq!(first.names_with(UnitAction::Failed), vec!["Broken"]);
    assert_eq!(count_rows(&pool, &target).await, 2);

    let second = manager.run_all(&options).await.expect("second run failed");
    assert_eq!(second.names_with(UnitAction::SkippedUpToDate), vec!["Codes"]);
    assert_eq!(second.names_with(UnitAction::Failed), vec!["Broken"]);
    assert_eq!(count_rows(&pool, &target).await, 2);
    assert_eq!(count_rows(&pool, &history).await, 2);

    let rollback = manager
        .rollback(&RollbackTarget::Units(vec!["Codes".into()]), false)
        .await
        .expect("rollback failed");
    assert_eq!(rollback.names_with(UnitAction::RolledBack), vec!["Codes"]);
    assert_eq!(count_rows(&pool, &target).await, 0);
    assert_eq!(count_rows(&pool, &history).await, 1);

    drop_tables(&pool, &[&target, &history]).await;
}

#[tokio::test]
async fn test_upserts_are_typed_and_idempotent() {
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let target = create_target_table(&pool).await;
    let mut session = PgSession::new(pool.clone());

    let rows = vec![
        row! { "code" => "a", "label" => "A", "rank" => 1 },
        row! { "code" => "b", "label" => "B", "rank" => 2 },
    ];
    let mut upserts = UpsertManager::new(&mut session);
    let first = upserts
        .bulk_upsert(&target, &rows, &["code"], None)
        .await
        .expect("bulk upsert failed");
    let second = upserts
        .bulk_upsert(&target, &rows, &["code"], None)
        .await
        .expect("bulk upsert failed");
    assert_eq!(first, UpsertCounts::new(2, 0, 0));
    assert_eq!(second, UpsertCounts::new(0, 0, 2));

    let (stored, action) = upserts
        .upsert(&target, &row! { "code" => "a" }, &row! { "rank" => 10 }, true)
        .await
        .expect("upsert failed");
    assert_eq!(action, UpsertAction::Updated);
    assert_eq!(stored.get("rank"), Some(&Value::from(10)));

    let (_, action) = upserts
        .upsert(&target, &row! { "code" => "a" }, &row! { "rank" => 10 }, true)
        .await
        .expect("upsert failed");
    assert_eq!(action, UpsertAction::Unchanged);

    session.commit().await.expect("commit failed");
    let rank: i32 = sqlx::query_scalar(&format!(r#"SELECT rank FROM "{target}" WHERE code = 'a'"#))
        .fetch_one(&pool)
        .await
        .expect("Failed to read rank");
    assert_eq!(rank, 10);

    drop_tables(&pool, &[&target]).await;
}

#[tokio::test]
async fn test_timestamp_upserts_settle_to_unchanged() {
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let target = create_target_table(&pool).await;
    let mut session = PgSession::new(pool.clone());
    let mut upserts = UpsertManager::new(&mut session);

    let where_ = row! { "code" => "spring" };
    let values = row! { "starts_at" => "2024-01-01T00:00:00Z", "rank" => 1 };
    let mut actions = Vec::new();
    for _ in 0..3 {
        let (_, action) = upserts
            .upsert(&target, &where_, &values, true)
            .await
            .expect("upsert failed");
        actions.push(action);
    }
    assert_eq!(
        actions,
        vec![UpsertAction::Created, UpsertAction::Unchanged, UpsertAction::Unchanged]
    );

    let rows = vec![row! { "code" => "summer", "starts_at" => "2024-06-01T12:30:00Z" }];
    let first = upserts
        .bulk_upsert(&target, &rows, &["code"], None)
        .await
        .expect("bulk upsert failed");
    let second = upserts
        .bulk_upsert(&target, &rows, &["code"], None)
        .await
        .expect("bulk upsert failed");
    assert_eq!(first, UpsertCounts::new(1, 0, 0));
    assert_eq!(second, UpsertCounts::new(0, 0, 1));

    session.rollback().await.expect("rollback failed");
    drop_tables(&pool, &[&target]).await;
}

#[tokio::test]
async fn test_session_rollback_discards_work() {
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let target = create_target_table(&pool).await;
    let mut session = PgSession::new(pool.clone());

    session
        .insert(&target, &row! { "code" => "temp" })
        .await
        .expect("insert failed");
    assert_eq!(
        session
            .select(&target, &row! { "code" => "temp" })
            .await
            .expect("select failed")
            .len(),
        1
    );
    session.rollback().await.expect("rollback failed");

    assert_eq!(count_rows(&pool, &target).await, 0);
    drop_tables(&pool, &[&target]).await;
}
