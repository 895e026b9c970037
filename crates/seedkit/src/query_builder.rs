//! SQL builder for the dynamic, schema-agnostic statements issued by [`crate::PgSession`].
//!
//! Values never appear in the SQL text. Rows travel as a single `jsonb`
//! parameter and are expanded server side with `jsonb_populate_record(set)`,
//! which also casts every field to its column type. Only identifiers are
//! interpolated, after validation and quoting.

use crate::errors::StoreError;

/// Validates and double-quotes a column or table identifier.
pub fn quote_ident(ident: &str) -> Result<String, StoreError> {
    let valid = !ident.is_empty()
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(ident.to_string()));
    }
    Ok(format!("\"{ident}\""))
}

/// Quotes a possibly schema-qualified table name (`schema.table`).
pub fn quote_table(table: &str) -> Result<String, StoreError> {
    let parts = table
        .split('.')
        .map(quote_ident)
        .collect::<Result<Vec<_>, _>>()?;
    if parts.len() > 2 {
        return Err(StoreError::InvalidIdentifier(table.to_string()));
    }
    Ok(parts.join("."))
}

/// Builder for WHERE clauses with parameter index tracking.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    conditions: Vec<String>,
    param_idx: usize,
}

impl QueryBuilder {
    /// Creates a new empty query builder.
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            param_idx: 1,
        }
    }

    /// Adds `left."col" IS NOT DISTINCT FROM right."col"` for every column.
    pub fn add_key_match(
        &mut self,
        columns: &[&str],
        left: &str,
        right: &str,
    ) -> Result<&mut Self, StoreError> {
        for column in columns {
            let column = quote_ident(column)?;
            self.conditions.push(format!(
                "{left}.{column} IS NOT DISTINCT FROM {right}.{column}"
            ));
        }
        Ok(self)
    }

    /// Increments and returns the next parameter index.
    pub fn next_param_idx(&mut self) -> usize {
        let idx = self.param_idx;
        self.param_idx += 1;
        idx
    }

    /// Returns true if no conditions have been added.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Builds the WHERE clause string (without the "WHERE" keyword).
    pub fn build_where(&self) -> String {
        self.conditions.join(" AND ")
    }

    /// Builds " WHERE ..." or an empty string when there are no conditions.
    pub fn build_where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.build_where())
        }
    }
}

fn column_list(columns: &[&str]) -> Result<Vec<String>, StoreError> {
    columns.iter().map(|c| quote_ident(c)).collect()
}

/// `SELECT` of rows matching an equality filter bound as `$1`.
pub fn select_sql(table: &str, filter_columns: &[&str]) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    let mut sql = format!("SELECT to_jsonb(t.*) FROM {table} AS t");
    if !filter_columns.is_empty() {
        let mut qb = QueryBuilder::new();
        let idx = qb.next_param_idx();
        qb.add_key_match(filter_columns, "t", "k")?;
        sql.push_str(&format!(
            ", jsonb_populate_record(NULL::{table}, ${idx}) AS k{}",
            qb.build_where_clause()
        ));
    }
    Ok(sql)
}

/// `SELECT` of rows matching any key of the jsonb array bound as `$1`.
pub fn select_any_sql(table: &str, key_columns: &[&str]) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    let mut qb = QueryBuilder::new();
    let idx = qb.next_param_idx();
    qb.add_key_match(key_columns, "t", "k")?;
    Ok(format!(
        "SELECT to_jsonb(t.*) FROM {table} AS t WHERE EXISTS (\
         SELECT 1 FROM jsonb_populate_recordset(NULL::{table}, ${idx}) AS k{})",
        qb.build_where_clause()
    ))
}

/// `INSERT` of one row (`many == false`, object in `$1`) or many rows (array in `$1`).
pub fn insert_sql(table: &str, columns: &[&str], many: bool) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    if columns.is_empty() {
        return Ok(format!(
            "INSERT INTO {table} AS t DEFAULT VALUES RETURNING to_jsonb(t.*)"
        ));
    }
    let quoted = column_list(columns)?;
    let selected: Vec<String> = quoted.iter().map(|c| format!("k.{c}")).collect();
    let source = if many {
        "jsonb_populate_recordset"
    } else {
        "jsonb_populate_record"
    };
    let mut sql = format!(
        "INSERT INTO {table} AS t ({}) SELECT {} FROM {source}(NULL::{table}, $1) AS k",
        quoted.join(", "),
        selected.join(", ")
    );
    if !many {
        sql.push_str(" RETURNING to_jsonb(t.*)");
    }
    Ok(sql)
}

/// `UPDATE` setting the columns of the object in `$1` on rows matching the filter in `$2`.
pub fn update_sql(
    table: &str,
    change_columns: &[&str],
    filter_columns: &[&str],
) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    let assignments: Vec<String> = column_list(change_columns)?
        .iter()
        .map(|c| format!("{c} = v.{c}"))
        .collect();
    let mut qb = QueryBuilder::new();
    let values_idx = qb.next_param_idx();
    let mut sql = format!(
        "UPDATE {table} AS t SET {} FROM jsonb_populate_record(NULL::{table}, ${values_idx}) AS v",
        assignments.join(", ")
    );
    if !filter_columns.is_empty() {
        let filter_idx = qb.next_param_idx();
        qb.add_key_match(filter_columns, "t", "k")?;
        sql.push_str(&format!(
            ", jsonb_populate_record(NULL::{table}, ${filter_idx}) AS k{}",
            qb.build_where_clause()
        ));
    }
    Ok(sql)
}

/// `DELETE` of rows matching the filter in `$1`.
pub fn delete_sql(table: &str, filter_columns: &[&str]) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    let mut sql = format!("DELETE FROM {table} AS t");
    if !filter_columns.is_empty() {
        let mut qb = QueryBuilder::new();
        let idx = qb.next_param_idx();
        qb.add_key_match(filter_columns, "t", "k")?;
        sql.push_str(&format!(
            " USING jsonb_populate_record(NULL::{table}, ${idx}) AS k{}",
            qb.build_where_clause()
        ));
    }
    Ok(sql)
}

/// Casts each object of the jsonb array in `$1` to the table's row type and
/// returns it as jsonb, in input order. Columns absent from an object come
/// back as `null`.
pub fn coerce_sql(table: &str) -> Result<String, StoreError> {
    let table = quote_table(table)?;
    Ok(format!(
        "SELECT to_jsonb(k.*) FROM jsonb_array_elements($1) WITH ORDINALITY AS e(r, n), \
         LATERAL jsonb_populate_record(NULL::{table}, e.r) AS k ORDER BY e.n"
    ))
}
