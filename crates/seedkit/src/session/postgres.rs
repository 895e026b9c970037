use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use super::{Row, Session};
use crate::errors::StoreError;
use crate::query_builder::{
    coerce_sql, delete_sql, insert_sql, quote_ident, quote_table, select_any_sql, select_sql,
    update_sql,
};

/// PostgreSQL [`Session`] holding one transaction at a time.
///
/// The transaction is opened by the first statement after a commit/rollback,
/// so every seed unit's work and its tracker record share one transaction.
pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    /// Creates a session on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Connects a small pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Connected to database");
        Ok(Self::new(pool))
    }

    /// Returns a reference to the pool for advanced usage.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the history table and its indexes when they do not exist yet.
    pub async fn ensure_history_table(&mut self, table: &str) -> Result<(), StoreError> {
        let quoted = quote_table(table)?;
        let bare = table.rsplit('.').next().unwrap_or(table);
        let unique = quote_ident(&format!("uq_{bare}_seeder_env"))?;
        let name_idx = quote_ident(&format!("idx_{bare}_seeder_name"))?;
        let batch_idx = quote_ident(&format!("idx_{bare}_batch"))?;

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {quoted} (
                    id               BIGSERIAL PRIMARY KEY,
                    seeder_name      VARCHAR(255) NOT NULL,
                    environment      VARCHAR(50)  NOT NULL,
                    batch            INTEGER      NOT NULL,
                    executed_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
                    execution_time   BIGINT,
                    records_affected BIGINT,
                    status           VARCHAR(20)  NOT NULL DEFAULT 'completed',
                    error_message    TEXT,
                    metadata_json    JSONB,
                    content_hash     VARCHAR(64),
                    CONSTRAINT {unique} UNIQUE (seeder_name, environment)
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS {name_idx} ON {quoted} (seeder_name)"),
            format!("CREATE INDEX IF NOT EXISTS {batch_idx} ON {quoted} (batch)"),
        ];

        let conn = self.connection().await?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        self.commit().await?;
        debug!("Ensured history table {table}");
        Ok(())
    }

    async fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| StoreError::InvalidInput("transaction unavailable".to_string()))
    }
}

fn columns(row: &Row) -> Vec<&str> {
    row.keys().map(String::as_str).collect()
}

fn same_columns<'a>(rows: &'a [Row]) -> Result<Vec<&'a str>, StoreError> {
    let first = columns(&rows[0]);
    if rows.iter().any(|row| columns(row) != first) {
        return Err(StoreError::InvalidInput(
            "all rows must use the same columns".to_string(),
        ));
    }
    Ok(first)
}

#[async_trait]
impl Session for PgSession {
    async fn select(&mut self, table: &str, filter: &Row) -> Result<Vec<Row>, StoreError> {
        let sql = select_sql(table, &columns(filter))?;
        let conn = self.connection().await?;
        let mut query = sqlx::query_as::<_, (Json<Row>,)>(&sql);
        if !filter.is_empty() {
            query = query.bind(Json(filter));
        }
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.into_iter().map(|(Json(row),)| row).collect())
    }

    async fn select_any(&mut self, table: &str, keys: &[Row]) -> Result<Vec<Row>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = select_any_sql(table, &same_columns(keys)?)?;
        let conn = self.connection().await?;
        let rows = sqlx::query_as::<_, (Json<Row>,)>(&sql)
            .bind(Json(keys))
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.into_iter().map(|(Json(row),)| row).collect())
    }

    async fn coerce(&mut self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let sql = coerce_sql(table)?;
        let conn = self.connection().await?;
        let typed = sqlx::query_as::<_, (Json<Row>,)>(&sql)
            .bind(Json(rows))
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .zip(typed)
            .map(|(row, (Json(typed),))| {
                row.iter()
                    .map(|(column, value)| {
                        let value = typed.get(column).unwrap_or(value);
                        (column.clone(), value.clone())
                    })
                    .collect()
            })
            .collect())
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, StoreError> {
        let column_names = columns(row);
        let sql = insert_sql(table, &column_names, false)?;
        let conn = self.connection().await?;
        let mut query = sqlx::query_as::<_, (Json<Row>,)>(&sql);
        if !column_names.is_empty() {
            query = query.bind(Json(row));
        }
        let (Json(stored),) = query.fetch_one(&mut *conn).await?;
        Ok(stored)
    }

    async fn insert_many(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(table, &same_columns(rows)?, true)?;
        let conn = self.connection().await?;
        let result = sqlx::query(&sql)
            .bind(Json(rows))
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Row,
        changes: &Row,
    ) -> Result<u64, StoreError> {
        if changes.is_empty() {
            return Ok(0);
        }
        let sql = update_sql(table, &columns(changes), &columns(filter))?;
        let conn = self.connection().await?;
        let mut query = sqlx::query(&sql).bind(Json(changes));
        if !filter.is_empty() {
            query = query.bind(Json(filter));
        }
        Ok(query.execute(&mut *conn).await?.rows_affected())
    }

    async fn delete(&mut self, table: &str, filter: &Row) -> Result<u64, StoreError> {
        let sql = delete_sql(table, &columns(filter))?;
        let conn = self.connection().await?;
        let mut query = sqlx::query(&sql);
        if !filter.is_empty() {
            query = query.bind(Json(filter));
        }
        Ok(query.execute(&mut *conn).await?.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
