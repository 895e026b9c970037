//! Orchestration of runs, rollbacks and status reporting.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::SeederConfig;
use crate::errors::ManagerError;
use crate::hash::content_hash;
use crate::lifecycle::{self, UnitOutcome};
use crate::models::{ExecutionRecord, ExecutionStats};
use crate::registry::Registry;
use crate::resolver::resolve_order;
use crate::session::Session;
use crate::tracker::{Tracker, TrackerStatistics};
use crate::unit::SeedContext;

/// What happened to one unit during an orchestration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    Executed,
    Failed,
    SkippedUpToDate,
    SkippedEnvironment,
    SkippedExcluded,
    DryRun,
    RolledBack,
    RollbackFailed,
    SkippedNoRollback,
    SkippedUnknown,
}

impl UnitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitAction::Executed => "executed",
            UnitAction::Failed => "failed",
            UnitAction::SkippedUpToDate => "skipped_up_to_date",
            UnitAction::SkippedEnvironment => "skipped_environment",
            UnitAction::SkippedExcluded => "skipped_excluded",
            UnitAction::DryRun => "dry_run",
            UnitAction::RolledBack => "rolled_back",
            UnitAction::RollbackFailed => "rollback_failed",
            UnitAction::SkippedNoRollback => "skipped_no_rollback",
            UnitAction::SkippedUnknown => "skipped_unknown",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            UnitAction::SkippedUpToDate
                | UnitAction::SkippedEnvironment
                | UnitAction::SkippedExcluded
                | UnitAction::SkippedNoRollback
                | UnitAction::SkippedUnknown
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UnitAction::Failed | UnitAction::RollbackFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub action: UnitAction,
    pub duration: Duration,
    pub records_affected: u64,
    pub error: Option<String>,
}

impl UnitReport {
    fn bare(name: &str, action: UnitAction) -> Self {
        Self {
            name: name.to_string(),
            action,
            duration: Duration::ZERO,
            records_affected: 0,
            error: None,
        }
    }

    fn from_outcome(outcome: UnitOutcome, action: UnitAction) -> Self {
        Self {
            name: outcome.name,
            action,
            duration: outcome.duration,
            records_affected: outcome.records_affected,
            error: outcome.error,
        }
    }
}

/// Aggregate result of a run or rollback.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    /// Batch shared by the units executed in this call.
    pub batch: Option<i32>,
    pub results: Vec<UnitReport>,
    pub errors: Vec<String>,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn push(&mut self, report: UnitReport) {
        if report.action.is_failure() {
            self.failed += 1;
            if let Some(error) = &report.error {
                self.errors.push(format!("{}: {error}", report.name));
            }
        } else if report.action.is_skip() {
            self.skipped += 1;
        } else {
            self.successful += 1;
        }
        self.results.push(report);
    }

    /// Names of the units that ended with `action`, in processing order.
    pub fn names_with(&self, action: UnitAction) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.action == action)
            .map(|r| r.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub rollback: ExecutionSummary,
    pub run: ExecutionSummary,
}

impl RefreshSummary {
    pub fn is_success(&self) -> bool {
        self.rollback.is_success() && self.run.is_success()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub total: usize,
    pub executed: usize,
    pub pending: usize,
    pub completed: Vec<String>,
    pub pending_list: Vec<String>,
    /// Executed units whose current hash differs from the stored one, is
    /// unknown, or that are no longer registered.
    pub changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ExecutionRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<TrackerStatistics>,
}

/// Options of `run_all` / `run_specific`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Falls back to the configured default environment.
    pub environment: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    /// Keeps units carrying any of these tags (`run_all` only).
    pub tags: Vec<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Which executed units a rollback targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    Units(Vec<String>),
    /// Every completed unit in the history.
    All,
    /// Completed units of the `n` most recent batches.
    LastBatches(usize),
}

/// Drives seed units from a [`Registry`] against one [`Session`].
pub struct SeedManager<S: Session> {
    session: S,
    registry: Registry,
    tracker: Tracker,
    config: SeederConfig,
}

impl<S: Session> SeedManager<S> {
    pub fn new(session: S, registry: Registry, config: SeederConfig) -> Self {
        if config.parallel {
            warn!("Parallel execution is not supported; seeders run sequentially");
        }
        let tracker = Tracker::with_table(config.tracking_table.clone());
        Self {
            session,
            registry,
            tracker,
            config,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn config(&self) -> &SeederConfig {
        &self.config
    }

    fn environment_of(&self, options: &RunOptions) -> String {
        options
            .environment
            .clone()
            .unwrap_or_else(|| self.config.default_environment.clone())
    }

    /// Runs every unit eligible for the environment (and tags), in dependency order.
    pub async fn run_all(&mut self, options: &RunOptions) -> Result<ExecutionSummary, ManagerError> {
        let environment = self.environment_of(options);
        let candidates: Vec<String> = self
            .registry
            .get_by_environment(&environment)
            .filter(|unit| options.tags.is_empty() || unit.metadata().has_any_tag(&options.tags))
            .map(|unit| unit.metadata().name.clone())
            .collect();

        let order = resolve_order(&self.registry, &candidates)?;
        info!("Running {} seeders for {environment}", order.len());
        self.execute(&order, &environment, options).await
    }

    /// Runs the named units, optionally pulling in their dependencies.
    ///
    /// Without dependencies the requested order is kept.
    pub async fn run_specific(
        &mut self,
        names: &[String],
        options: &RunOptions,
        with_dependencies: bool,
    ) -> Result<ExecutionSummary, ManagerError> {
        if let Some(missing) = names.iter().find(|name| !self.registry.contains(name)) {
            return Err(ManagerError::UnknownUnit(missing.clone()));
        }

        let environment = self.environment_of(options);
        let order = if with_dependencies {
            resolve_order(&self.registry, names)?
        } else {
            let mut seen = BTreeSet::new();
            names
                .iter()
                .filter(|name| seen.insert(name.as_str()))
                .cloned()
                .collect()
        };
        self.execute(&order, &environment, options).await
    }

    async fn execute(
        &mut self,
        order: &[String],
        environment: &str,
        options: &RunOptions,
    ) -> Result<ExecutionSummary, ManagerError> {
        let clock = Instant::now();
        let batch = self.tracker.next_batch(&mut self.session).await?;
        let mut summary = ExecutionSummary {
            total: order.len(),
            batch: Some(batch),
            ..Default::default()
        };

        for name in order {
            let report = self.execute_one(name, environment, batch, options).await?;
            summary.push(report);
        }
        self.session.commit().await?;

        summary.duration = clock.elapsed();
        info!(
            "Seeding finished: {} successful, {} failed, {} skipped ({:.2}s)",
            summary.successful,
            summary.failed,
            summary.skipped,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }

    async fn execute_one(
        &mut self,
        name: &str,
        environment: &str,
        batch: i32,
        options: &RunOptions,
    ) -> Result<UnitReport, ManagerError> {
        let Some(unit) = self.registry.get(name).map(Arc::clone) else {
            warn!("Seeder not found: {name}");
            return Ok(UnitReport::bare(name, UnitAction::SkippedUnknown));
        };
        let metadata = unit.metadata();
        let current_hash = content_hash(unit.as_ref());

        if !options.force
            && self
                .tracker
                .is_up_to_date(&mut self.session, name, environment, current_hash.as_deref())
                .await?
        {
            info!("Skipping up-to-date seeder: {name}");
            return Ok(UnitReport::bare(name, UnitAction::SkippedUpToDate));
        }

        if !metadata.runs_in(environment) {
            info!("Skipping seeder {name} (not for environment {environment})");
            return Ok(UnitReport::bare(name, UnitAction::SkippedEnvironment));
        }

        if self
            .config
            .profile(environment)
            .is_some_and(|profile| !profile.permits(name))
        {
            info!("Skipping seeder {name} (excluded in {environment})");
            return Ok(UnitReport::bare(name, UnitAction::SkippedExcluded));
        }

        if options.dry_run {
            info!("[DRY RUN] Would execute: {name}");
            return Ok(UnitReport::bare(name, UnitAction::DryRun));
        }

        let batch_size = metadata.batch_size.min(self.config.batch_size);
        let mut ctx = SeedContext::new(&mut self.session, environment)
            .with_registry(&self.registry)
            .with_batch_size(batch_size);
        let outcome = lifecycle::execute(unit.as_ref(), &mut ctx).await;

        match outcome.error.clone() {
            None => {
                let stats = ExecutionStats {
                    execution_time_ms: Some(outcome.duration.as_millis() as i64),
                    records_affected: Some(outcome.records_affected as i64),
                    metadata: Some(json!({ "description": metadata.description })),
                };
                self.tracker
                    .mark_executed(
                        &mut self.session,
                        name,
                        environment,
                        batch,
                        &stats,
                        current_hash.as_deref(),
                    )
                    .await?;
                self.session.commit().await?;
                Ok(UnitReport::from_outcome(outcome, UnitAction::Executed))
            }
            Some(error) => {
                self.session.rollback().await?;
                self.tracker
                    .mark_failed(
                        &mut self.session,
                        name,
                        environment,
                        batch,
                        &error,
                        Some(json!({ "failure": outcome.failure })),
                    )
                    .await?;
                self.session.commit().await?;
                Ok(UnitReport::from_outcome(outcome, UnitAction::Failed))
            }
        }
    }

    /// Rolls back the targeted units, most recent first.
    pub async fn rollback(
        &mut self,
        target: &RollbackTarget,
        dry_run: bool,
    ) -> Result<ExecutionSummary, ManagerError> {
        let environment = self.config.default_environment.clone();
        self.rollback_in(target, &environment, dry_run).await
    }

    async fn rollback_in(
        &mut self,
        target: &RollbackTarget,
        environment: &str,
        dry_run: bool,
    ) -> Result<ExecutionSummary, ManagerError> {
        let clock = Instant::now();
        let selected: Vec<String> = match target {
            RollbackTarget::Units(names) if names.is_empty() => {
                return Err(ManagerError::EmptyRollbackSelection);
            }
            RollbackTarget::LastBatches(0) => return Err(ManagerError::EmptyRollbackSelection),
            RollbackTarget::Units(names) => names.clone(),
            RollbackTarget::All => self
                .tracker
                .get_executed(&mut self.session, None)
                .await?
                .into_iter()
                .map(|record| record.seeder_name)
                .collect(),
            RollbackTarget::LastBatches(n) => self
                .tracker
                .get_last_n_batches(&mut self.session, *n)
                .await?
                .into_iter()
                .map(|record| record.seeder_name)
                .collect(),
        };

        let order = most_recent_first(selected);
        info!("Rolling back {} seeders", order.len());
        let mut summary = ExecutionSummary {
            total: order.len(),
            ..Default::default()
        };

        for name in &order {
            let report = self.rollback_one(name, environment, dry_run).await?;
            summary.push(report);
        }
        self.session.commit().await?;

        summary.duration = clock.elapsed();
        Ok(summary)
    }

    async fn rollback_one(
        &mut self,
        name: &str,
        environment: &str,
        dry_run: bool,
    ) -> Result<UnitReport, ManagerError> {
        let Some(unit) = self.registry.get(name).map(Arc::clone) else {
            warn!("Seeder not found: {name}");
            return Ok(UnitReport::bare(name, UnitAction::SkippedUnknown));
        };
        if !unit.metadata().can_rollback {
            warn!("Seeder {name} does not support rollback");
            return Ok(UnitReport::bare(name, UnitAction::SkippedNoRollback));
        }
        if dry_run {
            info!("[DRY RUN] Would rollback: {name}");
            return Ok(UnitReport::bare(name, UnitAction::DryRun));
        }

        let mut ctx = SeedContext::new(&mut self.session, environment)
            .with_registry(&self.registry)
            .with_batch_size(unit.metadata().batch_size.min(self.config.batch_size));
        let outcome = lifecycle::execute_rollback(unit.as_ref(), &mut ctx).await;

        if outcome.is_success() {
            self.tracker.mark_rolled_back(&mut self.session, name).await?;
            self.session.commit().await?;
            Ok(UnitReport::from_outcome(outcome, UnitAction::RolledBack))
        } else {
            self.session.rollback().await?;
            Ok(UnitReport::from_outcome(outcome, UnitAction::RollbackFailed))
        }
    }

    /// Rolls back everything, then re-runs every unit with `force`.
    pub async fn refresh(
        &mut self,
        environment: Option<&str>,
        dry_run: bool,
    ) -> Result<RefreshSummary, ManagerError> {
        let environment = environment
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_environment.clone());

        let rollback = self
            .rollback_in(&RollbackTarget::All, &environment, dry_run)
            .await?;
        let options = RunOptions::new()
            .environment(environment)
            .force(true)
            .dry_run(dry_run);
        let run = self.run_all(&options).await?;
        Ok(RefreshSummary { rollback, run })
    }

    /// Executed, pending and changed units across all environments.
    pub async fn status(&mut self, detailed: bool) -> Result<StatusReport, ManagerError> {
        let executed = self.tracker.get_executed(&mut self.session, None).await?;
        let executed_names: BTreeSet<&str> =
            executed.iter().map(|r| r.seeder_name.as_str()).collect();

        let (completed, pending_list): (Vec<String>, Vec<String>) = self
            .registry
            .names()
            .into_iter()
            .partition(|name| executed_names.contains(name.as_str()));

        let mut changed = BTreeSet::new();
        for record in &executed {
            let drifted = match self.registry.get(&record.seeder_name) {
                None => true,
                Some(unit) => match (content_hash(unit.as_ref()), &record.content_hash) {
                    (Some(current), Some(stored)) => &current != stored,
                    _ => true,
                },
            };
            if drifted {
                changed.insert(record.seeder_name.clone());
            }
        }

        let statistics = if detailed {
            Some(self.tracker.get_statistics(&mut self.session, None).await?)
        } else {
            None
        };
        self.session.commit().await?;

        Ok(StatusReport {
            total: self.registry.len(),
            executed: completed.len(),
            pending: pending_list.len(),
            completed,
            pending_list,
            changed: changed.into_iter().collect(),
            history: detailed.then_some(executed),
            statistics,
        })
    }

    pub async fn statistics(
        &mut self,
        environment: Option<&str>,
    ) -> Result<TrackerStatistics, ManagerError> {
        let stats = self
            .tracker
            .get_statistics(&mut self.session, environment)
            .await?;
        self.session.commit().await?;
        Ok(stats)
    }

    /// Deletes history rows (all of them without an environment) and commits.
    pub async fn clear_history(&mut self, environment: Option<&str>) -> Result<u64, ManagerError> {
        let removed = self
            .tracker
            .clear_history(&mut self.session, environment)
            .await?;
        self.session.commit().await?;
        Ok(removed)
    }
}

/// Reverses `names`, keeping only the last occurrence of each.
fn most_recent_first(names: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .rev()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
