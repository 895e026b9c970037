//! Run and rollback lifecycles of a single seed unit.
//!
//! Both lifecycles turn every stage error into a failed [`UnitOutcome`]; they
//! never return an error to the caller.

use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::errors::SeedError;
use crate::unit::{SeedContext, SeedUnit};

/// Lifecycle position of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Created,
    Validating,
    Running,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

/// Why a lifecycle ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    /// Rollback requested on a unit that declares no rollback support.
    Capability,
    Execution,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub name: String,
    pub state: UnitState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub duration: Duration,
    pub records_affected: u64,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl UnitOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: UnitState::Created,
            started_at: None,
            finished_at: None,
            duration: Duration::ZERO,
            records_affected: 0,
            error: None,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, UnitState::Completed | UnitState::RolledBack)
    }

    fn fail(&mut self, state: UnitState, err: &SeedError) {
        self.state = state;
        self.error = Some(err.to_string());
        self.failure = Some(match err {
            SeedError::ValidationFailed(_) => FailureKind::Validation,
            SeedError::RollbackUnsupported(_) => FailureKind::Capability,
            _ => FailureKind::Execution,
        });
    }
}

/// Runs validate, before_run, run and after_run.
pub async fn execute(unit: &dyn SeedUnit, ctx: &mut SeedContext<'_>) -> UnitOutcome {
    let name = unit.metadata().name.as_str();
    let mut outcome = UnitOutcome::new(name);
    let clock = Instant::now();

    let result = run_stages(unit, ctx, &mut outcome).await;

    outcome.finished_at = Some(OffsetDateTime::now_utc());
    outcome.duration = clock.elapsed();
    outcome.records_affected = ctx.records_affected();

    match result {
        Ok(()) => {
            outcome.state = UnitState::Completed;
            info!(
                "Completed seeder: {name} (Duration: {:.2}s, Records: {})",
                outcome.duration.as_secs_f64(),
                outcome.records_affected
            );
        }
        Err(err) => {
            error!("Error executing seeder {name}: {err}");
            outcome.fail(UnitState::Failed, &err);
        }
    }
    outcome
}

async fn run_stages(
    unit: &dyn SeedUnit,
    ctx: &mut SeedContext<'_>,
    outcome: &mut UnitOutcome,
) -> Result<(), SeedError> {
    let name = &unit.metadata().name;

    outcome.state = UnitState::Validating;
    if !unit.validate(ctx).await? {
        return Err(SeedError::ValidationFailed(name.clone()));
    }

    outcome.state = UnitState::Running;
    outcome.started_at = Some(OffsetDateTime::now_utc());
    info!("Starting seeder: {name}");
    unit.before_run(ctx).await?;
    unit.run(ctx).await?;
    unit.after_run(ctx).await
}

/// Runs before_rollback, rollback and after_rollback.
///
/// A unit without `can_rollback` fails with a capability error before any
/// hook runs.
pub async fn execute_rollback(unit: &dyn SeedUnit, ctx: &mut SeedContext<'_>) -> UnitOutcome {
    let name = unit.metadata().name.as_str();
    let mut outcome = UnitOutcome::new(name);
    let clock = Instant::now();

    let result = rollback_stages(unit, ctx, &mut outcome).await;

    outcome.finished_at = Some(OffsetDateTime::now_utc());
    outcome.duration = clock.elapsed();
    outcome.records_affected = ctx.records_affected();

    match result {
        Ok(()) => {
            outcome.state = UnitState::RolledBack;
            info!("Completed rollback for seeder: {name}");
        }
        Err(err) => {
            error!("Error rolling back seeder {name}: {err}");
            outcome.fail(UnitState::RollbackFailed, &err);
        }
    }
    outcome
}

async fn rollback_stages(
    unit: &dyn SeedUnit,
    ctx: &mut SeedContext<'_>,
    outcome: &mut UnitOutcome,
) -> Result<(), SeedError> {
    let metadata = unit.metadata();
    if !metadata.can_rollback {
        return Err(SeedError::RollbackUnsupported(metadata.name.clone()));
    }

    outcome.state = UnitState::RollingBack;
    outcome.started_at = Some(OffsetDateTime::now_utc());
    info!("Starting rollback for seeder: {}", metadata.name);
    unit.before_rollback(ctx).await?;
    unit.rollback(ctx).await?;
    unit.after_rollback(ctx).await
}
