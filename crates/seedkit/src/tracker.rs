//! Execution history ledger.
//!
//! One row per `(seeder_name, environment)`: re-running a unit merges into
//! the existing row instead of appending a new one.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::{ExecutionRecord, ExecutionStats, ExecutionStatus};
use crate::row;
use crate::session::{Row, Session};

pub const DEFAULT_TRACKING_TABLE: &str = "seeder_history";

/// Completed/failed counts for one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentCounts {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStatistics {
    pub total_executions: u64,
    pub completed: u64,
    pub failed: u64,
    /// Mean execution time of completed runs, in milliseconds.
    pub average_execution_time_ms: f64,
    pub total_records_affected: i64,
    pub environments: BTreeMap<String, EnvironmentCounts>,
}

/// Reads and writes the history table through a [`Session`].
#[derive(Debug, Clone)]
pub struct Tracker {
    table: String,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_table(DEFAULT_TRACKING_TABLE)
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn load(
        &self,
        session: &mut dyn Session,
        filter: &Row,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        session
            .select(&self.table, filter)
            .await?
            .into_iter()
            .map(ExecutionRecord::from_row)
            .collect()
    }

    /// Inserts `record`, or overwrites the row already stored for its
    /// `(seeder_name, environment)`.
    async fn merge(
        &self,
        session: &mut dyn Session,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        let key = row! {
            "seeder_name" => record.seeder_name.as_str(),
            "environment" => record.environment.as_str(),
        };
        let row = record.to_row()?;
        let updated = session.update(&self.table, &key, &row).await?;
        if updated == 0 {
            session.insert(&self.table, &row).await?;
        }
        Ok(())
    }

    /// Records a successful run. A `None` hash is stored as such and will
    /// never count as up to date.
    pub async fn mark_executed(
        &self,
        session: &mut dyn Session,
        name: &str,
        environment: &str,
        batch: i32,
        stats: &ExecutionStats,
        content_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = ExecutionRecord {
            id: None,
            seeder_name: name.to_string(),
            environment: environment.to_string(),
            batch,
            executed_at: OffsetDateTime::now_utc(),
            execution_time: stats.execution_time_ms,
            records_affected: stats.records_affected,
            status: ExecutionStatus::Completed,
            error_message: None,
            metadata_json: stats.metadata.clone(),
            content_hash: content_hash.map(str::to_string),
        };
        self.merge(session, &record).await?;
        debug!("Marked seeder {name} as executed in batch {batch}");
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        session: &mut dyn Session,
        name: &str,
        environment: &str,
        batch: i32,
        error: &str,
        metadata: Option<Value>,
    ) -> Result<(), StoreError> {
        let record = ExecutionRecord {
            id: None,
            seeder_name: name.to_string(),
            environment: environment.to_string(),
            batch,
            executed_at: OffsetDateTime::now_utc(),
            execution_time: None,
            records_affected: None,
            status: ExecutionStatus::Failed,
            error_message: Some(error.to_string()),
            metadata_json: metadata,
            content_hash: None,
        };
        self.merge(session, &record).await?;
        debug!("Marked seeder {name} as failed in batch {batch}");
        Ok(())
    }

    /// Deletes every history row of `name`, across environments.
    pub async fn mark_rolled_back(
        &self,
        session: &mut dyn Session,
        name: &str,
    ) -> Result<u64, StoreError> {
        session
            .delete(&self.table, &row! { "seeder_name" => name })
            .await
    }

    pub async fn get_record(
        &self,
        session: &mut dyn Session,
        name: &str,
        environment: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let filter = row! { "seeder_name" => name, "environment" => environment };
        Ok(self.load(session, &filter).await?.into_iter().next())
    }

    /// True only for a completed record whose stored hash equals `current_hash`.
    pub async fn is_up_to_date(
        &self,
        session: &mut dyn Session,
        name: &str,
        environment: &str,
        current_hash: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(current) = current_hash else {
            return Ok(false);
        };
        let Some(record) = self.get_record(session, name, environment).await? else {
            return Ok(false);
        };
        Ok(record.is_completed() && record.content_hash.as_deref() == Some(current))
    }

    /// Completed records ordered by batch, then execution time.
    pub async fn get_executed(
        &self,
        session: &mut dyn Session,
        environment: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut filter = row! { "status" => ExecutionStatus::Completed.as_str() };
        if let Some(environment) = environment {
            filter.insert("environment".into(), Value::from(environment));
        }
        let mut records = self.load(session, &filter).await?;
        sort_chronologically(&mut records);
        Ok(records)
    }

    /// Every history row (completed and failed), oldest first.
    pub async fn get_history(
        &self,
        session: &mut dyn Session,
        environment: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let filter = match environment {
            Some(environment) => row! { "environment" => environment },
            None => Row::new(),
        };
        let mut records = self.load(session, &filter).await?;
        sort_chronologically(&mut records);
        Ok(records)
    }

    /// The subset of `all_names` with no completed record in `environment`,
    /// in input order.
    pub async fn get_pending(
        &self,
        session: &mut dyn Session,
        all_names: &[String],
        environment: &str,
    ) -> Result<Vec<String>, StoreError> {
        let executed: BTreeSet<String> = self
            .get_executed(session, Some(environment))
            .await?
            .into_iter()
            .map(|record| record.seeder_name)
            .collect();
        Ok(all_names
            .iter()
            .filter(|name| !executed.contains(*name))
            .cloned()
            .collect())
    }

    /// Completed records of the `n` highest batch numbers, oldest first.
    pub async fn get_last_n_batches(
        &self,
        session: &mut dyn Session,
        n: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executed = self.get_executed(session, None).await?;
        let batches: BTreeSet<i32> = executed.iter().map(|record| record.batch).collect();
        let selected: BTreeSet<i32> = batches.into_iter().rev().take(n).collect();
        Ok(executed
            .into_iter()
            .filter(|record| selected.contains(&record.batch))
            .collect())
    }

    /// `max(batch) + 1`, or 1 when the history is empty.
    pub async fn next_batch(&self, session: &mut dyn Session) -> Result<i32, StoreError> {
        let records = self.load(session, &Row::new()).await?;
        Ok(records.iter().map(|r| r.batch).max().unwrap_or(0) + 1)
    }

    pub async fn get_statistics(
        &self,
        session: &mut dyn Session,
        environment: Option<&str>,
    ) -> Result<TrackerStatistics, StoreError> {
        let records = self.get_history(session, environment).await?;
        let mut stats = TrackerStatistics {
            total_executions: records.len() as u64,
            ..Default::default()
        };

        let mut timed_runs = 0u64;
        let mut total_time = 0i64;
        for record in &records {
            let counts = stats
                .environments
                .entry(record.environment.clone())
                .or_default();
            match record.status {
                ExecutionStatus::Completed => {
                    counts.completed += 1;
                    stats.completed += 1;
                    if let Some(ms) = record.execution_time {
                        timed_runs += 1;
                        total_time += ms;
                    }
                    stats.total_records_affected += record.records_affected.unwrap_or(0);
                }
                ExecutionStatus::Failed => {
                    counts.failed += 1;
                    stats.failed += 1;
                }
            }
        }
        if timed_runs > 0 {
            stats.average_execution_time_ms = total_time as f64 / timed_runs as f64;
        }
        Ok(stats)
    }

    /// Deletes history rows for `environment`, or all of them.
    pub async fn clear_history(
        &self,
        session: &mut dyn Session,
        environment: Option<&str>,
    ) -> Result<u64, StoreError> {
        let filter = match environment {
            Some(environment) => row! { "environment" => environment },
            None => Row::new(),
        };
        let removed = session.delete(&self.table, &filter).await?;
        match environment {
            Some(environment) => info!("Cleared {removed} history rows for {environment}"),
            None => info!("Cleared all {removed} history rows"),
        }
        Ok(removed)
    }
}

fn sort_chronologically(records: &mut [ExecutionRecord]) {
    records.sort_by(|a, b| {
        a.batch
            .cmp(&b.batch)
            .then(a.executed_at.cmp(&b.executed_at))
            .then(a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    fn stats(ms: i64, records: i64) -> ExecutionStats {
        ExecutionStats {
            execution_time_ms: Some(ms),
            records_affected: Some(records),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_next_batch_starts_at_one() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();

        assert_eq!(tracker.next_batch(&mut session).await.unwrap(), 1);

        tracker
            .mark_executed(&mut session, "A", "dev", 4, &stats(1, 1), Some("h"))
            .await
            .unwrap();
        tracker
            .mark_executed(&mut session, "B", "dev", 2, &stats(1, 1), Some("h"))
            .await
            .unwrap();
        assert_eq!(tracker.next_batch(&mut session).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_is_up_to_date_truth_table() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();

        assert!(!tracker
            .is_up_to_date(&mut session, "A", "dev", Some("h1"))
            .await
            .unwrap());

        tracker
            .mark_executed(&mut session, "A", "dev", 1, &stats(1, 1), Some("h1"))
            .await
            .unwrap();
        assert!(tracker
            .is_up_to_date(&mut session, "A", "dev", Some("h1"))
            .await
            .unwrap());
        assert!(!tracker
            .is_up_to_date(&mut session, "A", "dev", Some("h2"))
            .await
            .unwrap());
        assert!(!tracker
            .is_up_to_date(&mut session, "A", "dev", None)
            .await
            .unwrap());
        assert!(!tracker
            .is_up_to_date(&mut session, "A", "staging", Some("h1"))
            .await
            .unwrap());

        tracker
            .mark_failed(&mut session, "A", "dev", 2, "boom", None)
            .await
            .unwrap();
        assert!(!tracker
            .is_up_to_date(&mut session, "A", "dev", Some("h1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stored_null_hash_never_matches() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();
        tracker
            .mark_executed(&mut session, "A", "dev", 1, &stats(1, 1), None)
            .await
            .unwrap();

        let record = tracker
            .get_record(&mut session, "A", "dev")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.content_hash, None);
        assert!(!tracker
            .is_up_to_date(&mut session, "A", "dev", Some("h"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rerun_merges_into_one_row() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();

        tracker
            .mark_failed(&mut session, "A", "dev", 1, "boom", None)
            .await
            .unwrap();
        tracker
            .mark_executed(&mut session, "A", "dev", 2, &stats(5, 3), Some("h"))
            .await
            .unwrap();

        let rows = session.rows(DEFAULT_TRACKING_TABLE);
        assert_eq!(rows.len(), 1);
        let record = tracker
            .get_record(&mut session, "A", "dev")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.batch, 2);
        assert!(record.is_completed());
        assert_eq!(record.error_message, None);
    }

    #[tokio::test]
    async fn test_pending_and_last_batches() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();
        for (name, batch) in [("A", 1), ("B", 2), ("C", 3)] {
            tracker
                .mark_executed(&mut session, name, "dev", batch, &stats(1, 1), Some("h"))
                .await
                .unwrap();
        }
        tracker
            .mark_failed(&mut session, "D", "dev", 3, "boom", None)
            .await
            .unwrap();

        let names: Vec<String> = ["A", "B", "C", "D", "E"].map(String::from).to_vec();
        let pending = tracker
            .get_pending(&mut session, &names, "dev")
            .await
            .unwrap();
        assert_eq!(pending, vec!["D".to_string(), "E".to_string()]);

        let last: Vec<String> = tracker
            .get_last_n_batches(&mut session, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.seeder_name)
            .collect();
        assert_eq!(last, vec!["B".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_rolled_back_removes_all_environments() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();
        for env in ["dev", "staging"] {
            tracker
                .mark_executed(&mut session, "A", env, 1, &stats(1, 1), Some("h"))
                .await
                .unwrap();
        }
        tracker
            .mark_executed(&mut session, "B", "dev", 1, &stats(1, 1), Some("h"))
            .await
            .unwrap();

        let removed = tracker.mark_rolled_back(&mut session, "A").await.unwrap();
        assert_eq!(removed, 2);
        let left = tracker.get_executed(&mut session, None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].seeder_name, "B");
    }

    #[tokio::test]
    async fn test_statistics() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();
        tracker
            .mark_executed(&mut session, "A", "dev", 1, &stats(10, 4), Some("h"))
            .await
            .unwrap();
        tracker
            .mark_executed(&mut session, "B", "dev", 1, &stats(30, 6), Some("h"))
            .await
            .unwrap();
        tracker
            .mark_failed(&mut session, "C", "staging", 1, "boom", None)
            .await
            .unwrap();

        let all = tracker.get_statistics(&mut session, None).await.unwrap();
        assert_eq!(all.total_executions, 3);
        assert_eq!(all.completed, 2);
        assert_eq!(all.failed, 1);
        assert_eq!(all.average_execution_time_ms, 20.0);
        assert_eq!(all.total_records_affected, 10);
        assert_eq!(
            all.environments.get("staging"),
            Some(&EnvironmentCounts {
                completed: 0,
                failed: 1
            })
        );

        let dev = tracker
            .get_statistics(&mut session, Some("dev"))
            .await
            .unwrap();
        assert_eq!(dev.total_executions, 2);
        assert_eq!(dev.failed, 0);
    }

    #[tokio::test]
    async fn test_clear_history_by_environment() {
        let tracker = Tracker::new();
        let mut session = MemorySession::new();
        for env in ["dev", "staging"] {
            tracker
                .mark_executed(&mut session, "A", env, 1, &stats(1, 1), Some("h"))
                .await
                .unwrap();
        }

        assert_eq!(
            tracker
                .clear_history(&mut session, Some("dev"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(tracker.clear_history(&mut session, None).await.unwrap(), 1);
        assert_eq!(tracker.next_batch(&mut session).await.unwrap(), 1);
    }
}
