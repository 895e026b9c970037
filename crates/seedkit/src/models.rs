use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::errors::StoreError;
use crate::session::Row;

/// Environment name that matches every target environment.
pub const ALL_ENVIRONMENTS: &str = "all";

/// Metadata declared by a seed unit's author.
///
/// Set-valued fields are ordered so the serialized form (and therefore the
/// content hash) does not depend on declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub environments: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    /// Lower runs first among units whose dependencies are satisfied.
    pub priority: i32,
    /// Advisory chunk size for bulk operations.
    pub batch_size: usize,
    pub can_rollback: bool,
    pub tags: BTreeSet<String>,
}

impl SeedMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            environments: BTreeSet::from([ALL_ENVIRONMENTS.to_string()]),
            dependencies: BTreeSet::new(),
            priority: 100,
            batch_size: 1000,
            can_rollback: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the default `["all"]` with an explicit environment list.
    pub fn environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn can_rollback(mut self, can_rollback: bool) -> Self {
        self.can_rollback = can_rollback;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Whether the unit is eligible for `environment` (declares it or `"all"`).
    pub fn runs_in(&self, environment: &str) -> bool {
        self.environments.contains(ALL_ENVIRONMENTS) || self.environments.contains(environment)
    }

    /// Whether the unit carries at least one of `tags`.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }
}

/// Outcome stored in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// One row of the history table: the latest run of a unit in an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub seeder_name: String,
    pub environment: String,
    pub batch: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
    /// Milliseconds.
    #[serde(default)]
    pub execution_time: Option<i64>,
    #[serde(default)]
    pub records_affected: Option<i64>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata_json: Option<Value>,
    /// `None` marks a legacy or unknown record; it never counts as up to date.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl ExecutionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub(crate) fn from_row(row: Row) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(Value::Object(row))?)
    }

    pub(crate) fn to_row(&self) -> Result<Row, StoreError> {
        crate::session::to_row(self)
    }
}

/// Execution statistics handed to the tracker when a unit completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub execution_time_ms: Option<i64>,
    pub records_affected: Option<i64>,
    pub metadata: Option<Value>,
}
