use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{Row, Session, matches};
use crate::errors::StoreError;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// In-process [`Session`] with snapshot transactions.
///
/// Rows inserted without an `id` column get a sequential one, mirroring a
/// serial primary key. Uncommitted work lives in a working copy that
/// `rollback` resets to the last committed state.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    committed: BTreeMap<String, Table>,
    working: BTreeMap<String, Table>,
    rollbacks: usize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`.
    pub fn committed_rows(&self, table: &str) -> Vec<Row> {
        self.committed
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Rows of `table` as seen inside the open transaction.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.working
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table, StoreError> {
        if table.is_empty() {
            return Err(StoreError::InvalidIdentifier(table.to_string()));
        }
        Ok(self.working.entry(table.to_string()).or_default())
    }

    fn insert_row(&mut self, table: &str, row: &Row) -> Result<Row, StoreError> {
        let table = self.table_mut(table)?;
        let mut stored = row.clone();
        match stored.get("id") {
            Some(id) => {
                if let Some(id) = id.as_i64() {
                    table.next_id = table.next_id.max(id);
                }
            }
            None => {
                table.next_id += 1;
                stored.insert("id".to_string(), Value::from(table.next_id));
            }
        }
        table.rows.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn select(&mut self, table: &str, filter: &Row) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .working
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn select_any(&mut self, table: &str, keys: &[Row]) -> Result<Vec<Row>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .working
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| keys.iter().any(|key| matches(row, key)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, StoreError> {
        self.insert_row(table, row)
    }

    async fn insert_many(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        for row in rows {
            self.insert_row(table, row)?;
        }
        Ok(rows.len() as u64)
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
        let table = self.table_mut(table)?;
        let mut touched = 0;
        for row in table.rows.iter_mut().filter(|row| matches(row, filter)) {
            for (column, value) in changes {
                row.insert(column.clone(), value.clone());
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&mut self, table: &str, filter: &Row) -> Result<u64, StoreError> {
        let table = self.table_mut(table)?;
        let before = table.rows.len();
        table.rows.retain(|row| !matches(row, filter));
        Ok((before - table.rows.len()) as u64)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.committed = self.working.clone();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.working = self.committed.clone();
        self.rollbacks += 1;
        Ok(())
    }
}
