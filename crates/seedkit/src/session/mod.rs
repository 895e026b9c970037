//! Transactional sessions over the target database.
//!
//! A [`Session`] exposes row-level operations on named tables plus explicit
//! `commit`/`rollback`. Rows are JSON objects keyed by column name, which lets
//! the upsert engine and the tracker stay independent of any concrete schema.
//! [`PgSession`] talks to PostgreSQL through sqlx; [`MemorySession`] keeps
//! everything in process and is what the test suites run against.

mod memory;
mod postgres;

pub use memory::MemorySession;
pub use postgres::PgSession;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::StoreError;

/// A database row as column name to value.
pub type Row = Map<String, Value>;

/// Builds a [`Row`] from `column => value` pairs.
///
/// ```rust,ignore
/// let row = row! { "code" => "admin", "label" => "Administrator" };
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(($column).to_string(), $crate::__private::Value::from($value)); )+
        row
    }};
}

/// Transactional handle shared by every unit of an orchestration call.
///
/// All operations run inside the current transaction, which is opened lazily
/// and ends with [`Session::commit`] or [`Session::rollback`]. Filters are
/// column equality conditions joined with AND, where `null` matches a missing
/// or null column. An empty filter matches every row.
#[async_trait]
pub trait Session: Send {
    /// Returns the rows of `table` matching `filter`.
    async fn select(&mut self, table: &str, filter: &Row) -> Result<Vec<Row>, StoreError>;

    /// Returns the rows of `table` matching any of `keys` in a single lookup.
    ///
    /// Every key must use the same set of columns.
    async fn select_any(&mut self, table: &str, keys: &[Row]) -> Result<Vec<Row>, StoreError>;

    /// Inserts one row and returns it as stored (including generated columns).
    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, StoreError>;

    /// Inserts many rows with one statement. Every row must use the same columns.
    async fn insert_many(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError>;

    /// Sets `changes` on every row matching `filter`; returns the number of rows touched.
    async fn update(&mut self, table: &str, filter: &Row, changes: &Row)
    -> Result<u64, StoreError>;

    /// Deletes every row matching `filter`; returns the number of rows removed.
    async fn delete(&mut self, table: &str, filter: &Row) -> Result<u64, StoreError>;

    /// Returns `rows` with each value in the form the store hands it back
    /// after casting it to its column type, so it compares equal to what
    /// [`Session::select`] returns. Each row keeps exactly its own columns.
    ///
    /// The default is the identity, for stores that keep values verbatim.
    async fn coerce(&mut self, _table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        Ok(rows.to_vec())
    }

    /// Makes the work done since the last commit/rollback durable.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards the work done since the last commit/rollback.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Serializes a struct into a [`Row`].
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::InvalidInput(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Projects `row` onto `columns`; missing columns are an error.
pub fn project(row: &Row, columns: &[&str]) -> Result<Row, StoreError> {
    columns
        .iter()
        .map(|column| {
            row.get(*column)
                .map(|value| (column.to_string(), value.clone()))
                .ok_or_else(|| StoreError::InvalidInput(format!("row is missing key field {column}")))
        })
        .collect()
}

/// Whether `row` satisfies the equality `filter`.
pub(crate) fn matches(row: &Row, filter: &Row) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_macro() {
        let row = row! { "code" => "A", "rank" => 3, "active" => true };
        assert_eq!(row.get("code"), Some(&json!("A")));
        assert_eq!(row.get("rank"), Some(&json!(3)));
        assert_eq!(row.get("active"), Some(&json!(true)));
        assert!(row!().is_empty());
    }

    #[test]
    fn test_matches_treats_missing_as_null() {
        let row = row! { "code" => "A" };
        assert!(matches(&row, &row! { "code" => "A" }));
        assert!(matches(&row, &row! { "label" => Value::Null }));
        assert!(!matches(&row, &row! { "code" => "B" }));
        assert!(matches(&row, &Row::new()));
    }

    #[test]
    fn test_project_requires_key_fields() {
        let row = row! { "code" => "A", "label" => "x" };
        assert_eq!(project(&row, &["code"]).unwrap(), row! { "code" => "A" });
        assert!(project(&row, &["missing"]).is_err());
    }
}
