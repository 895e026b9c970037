//! Idempotent create/update primitives keyed by business keys.
//!
//! Every write is preceded by a field-level diff against the stored row, so
//! re-running a seed unit over unchanged data reports `unchanged` instead of
//! issuing no-op updates.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::StoreError;
use crate::session::{Row, Session, project};

/// What an [`UpsertManager::upsert`] call did to the target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Created => "created",
            UpsertAction::Updated => "updated",
            UpsertAction::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-action totals of a [`UpsertManager::bulk_upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl UpsertCounts {
    pub fn new(created: u64, updated: u64, unchanged: u64) -> Self {
        Self {
            created,
            updated,
            unchanged,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.unchanged
    }
}

/// Upsert operations over a borrowed [`Session`].
pub struct UpsertManager<'s> {
    session: &'s mut dyn Session,
}

impl<'s> UpsertManager<'s> {
    pub fn new(session: &'s mut dyn Session) -> Self {
        Self { session }
    }

    /// Returns the row matching `where_`, inserting `defaults` merged under
    /// `where_` when there is none. The flag is true when a row was created.
    pub async fn get_or_create(
        &mut self,
        table: &str,
        where_: &Row,
        defaults: Option<&Row>,
    ) -> Result<(Row, bool), StoreError> {
        if let Some(existing) = self.session.select(table, where_).await?.into_iter().next() {
            return Ok((existing, false));
        }

        let mut payload = defaults.cloned().unwrap_or_default();
        payload.extend(where_.clone());
        let created = self.session.insert(table, &payload).await?;
        debug!("Created row in {table}");
        Ok((created, true))
    }

    /// Inserts `where_ ∪ values` when no row matches `where_`; otherwise
    /// updates the fields of `values` that differ from the stored row, unless
    /// `update_existing` is false. Values are compared after
    /// [`Session::coerce`], so `2024-01-01T00:00:00Z` equals a stored
    /// `2024-01-01T00:00:00+00:00`.
    pub async fn upsert(
        &mut self,
        table: &str,
        where_: &Row,
        values: &Row,
        update_existing: bool,
    ) -> Result<(Row, UpsertAction), StoreError> {
        let Some(mut existing) = self.session.select(table, where_).await?.into_iter().next()
        else {
            let mut payload = where_.clone();
            payload.extend(values.clone());
            let created = self.session.insert(table, &payload).await?;
            return Ok((created, UpsertAction::Created));
        };

        if !update_existing {
            return Ok((existing, UpsertAction::Unchanged));
        }

        let values = self
            .session
            .coerce(table, std::slice::from_ref(values))
            .await?
            .pop()
            .unwrap_or_default();
        let changes = diff(&existing, &values, values.keys());
        if changes.is_empty() {
            return Ok((existing, UpsertAction::Unchanged));
        }

        self.session.update(table, where_, &changes).await?;
        existing.extend(changes);
        Ok((existing, UpsertAction::Updated))
    }

    /// Upserts many rows keyed by `key_fields` with a single lookup and a
    /// single batched insert.
    ///
    /// Existing rows receive `update_fields` (all non-key fields when `None`)
    /// under the same diff-before-write rule as [`Self::upsert`].
    pub async fn bulk_upsert(
        &mut self,
        table: &str,
        rows: &[Row],
        key_fields: &[&str],
        update_fields: Option<&[&str]>,
    ) -> Result<UpsertCounts, StoreError> {
        let mut counts = UpsertCounts::default();
        if rows.is_empty() {
            return Ok(counts);
        }
        if key_fields.is_empty() {
            return Err(StoreError::InvalidInput(
                "bulk upsert needs at least one key field".to_string(),
            ));
        }
        let rows = self.session.coerce(table, rows).await?;

        let keys = rows
            .iter()
            .map(|row| project(row, key_fields))
            .collect::<Result<Vec<_>, _>>()?;

        let mut existing_by_key: HashMap<String, Row> = HashMap::new();
        for row in self.session.select_any(table, &keys).await? {
            let key = key_string(&project(&row, key_fields)?);
            existing_by_key.entry(key).or_insert(row);
        }

        let mut pending: Vec<Row> = Vec::new();
        let mut pending_by_key: HashMap<String, usize> = HashMap::new();

        for (row, key_row) in rows.iter().zip(&keys) {
            let key = key_string(key_row);
            let fields: Vec<&String> = match update_fields {
                Some(fields) => row
                    .keys()
                    .filter(|f| fields.contains(&f.as_str()))
                    .collect(),
                None => row
                    .keys()
                    .filter(|f| !key_fields.contains(&f.as_str()))
                    .collect(),
            };

            if let Some(existing) = existing_by_key.get_mut(&key) {
                let changes = diff(existing, row, fields.into_iter());
                if changes.is_empty() {
                    counts.unchanged += 1;
                } else {
                    self.session.update(table, key_row, &changes).await?;
                    existing.extend(changes);
                    counts.updated += 1;
                }
            } else if let Some(&idx) = pending_by_key.get(&key) {
                // Same key seen earlier in this call: fold into the pending insert.
                let changes = diff(&pending[idx], row, fields.into_iter());
                if changes.is_empty() {
                    counts.unchanged += 1;
                } else {
                    pending[idx].extend(changes);
                    counts.updated += 1;
                }
            } else {
                pending_by_key.insert(key, pending.len());
                pending.push(row.clone());
                counts.created += 1;
            }
        }

        if !pending.is_empty() {
            insert_grouped(self.session, table, &pending).await?;
        }

        debug!(
            "Bulk upsert into {table}: {} created, {} updated, {} unchanged",
            counts.created, counts.updated, counts.unchanged
        );
        Ok(counts)
    }
}

// insert_many requires uniform columns; rows with differing shapes go in separate batches.
async fn insert_grouped(
    session: &mut dyn Session,
    table: &str,
    rows: &[Row],
) -> Result<(), StoreError> {
    let mut groups: Vec<(Vec<&String>, Vec<Row>)> = Vec::new();
    for row in rows {
        let shape: Vec<&String> = row.keys().collect();
        match groups.iter_mut().find(|(s, _)| *s == shape) {
            Some((_, group)) => group.push(row.clone()),
            None => groups.push((shape, vec![row.clone()])),
        }
    }
    for (_, group) in groups {
        session.insert_many(table, &group).await?;
    }
    Ok(())
}

/// Fields of `incoming` (restricted to `fields`) whose value differs from `current`.
fn diff<'a>(current: &Row, incoming: &Row, fields: impl Iterator<Item = &'a String>) -> Row {
    fields
        .filter_map(|field| {
            let new_value = incoming.get(field)?;
            let current_value = current.get(field).unwrap_or(&Value::Null);
            (current_value != new_value).then(|| (field.clone(), new_value.clone()))
        })
        .collect()
}

fn key_string(key: &Row) -> String {
    Value::Array(key.values().cloned().collect()).to_string()
}
