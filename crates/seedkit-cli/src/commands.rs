//! Subcommand handlers and their console rendering.
//!
//! Handlers are generic over [`Session`] so they run the same against
//! Postgres and against a `MemorySession` in tests.

use std::fmt::Write;

use seedkit::{
    ExecutionSummary, ManagerError, RefreshSummary, Registry, RunOptions, SeedManager, Session,
    StatusReport, UnitAction,
};
use tracing::info;

/// Arguments of `seedkit run` after environment resolution.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub environment: String,
    pub force: bool,
    /// Clears the environment's history first, so everything re-runs.
    pub fresh: bool,
    pub dry_run: bool,
    pub seeders: Vec<String>,
    pub tags: Vec<String>,
}

pub async fn run<S: Session>(
    manager: &mut SeedManager<S>,
    request: &RunRequest,
) -> Result<ExecutionSummary, ManagerError> {
    if request.fresh {
        if request.dry_run {
            info!("[DRY RUN] Would clear history for {}", request.environment);
        } else {
            let removed = manager.clear_history(Some(&request.environment)).await?;
            info!("Cleared {removed} history records for {}", request.environment);
        }
    }

    let options = RunOptions::new()
        .environment(request.environment.clone())
        .force(request.force || request.fresh)
        .dry_run(request.dry_run)
        .tags(request.tags.iter().cloned());

    if request.seeders.is_empty() {
        manager.run_all(&options).await
    } else {
        manager.run_specific(&request.seeders, &options, true).await
    }
}

pub fn render_summary(title: &str, summary: &ExecutionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{title}");
    let _ = writeln!(
        out,
        "  Total: {}  Successful: {}  Failed: {}  Skipped: {}  ({:.2}s)",
        summary.total,
        summary.successful,
        summary.failed,
        summary.skipped,
        summary.duration.as_secs_f64()
    );
    if let Some(batch) = summary.batch {
        let _ = writeln!(out, "  Batch: {batch}");
    }

    for report in &summary.results {
        let marker = if report.action.is_failure() {
            "FAIL"
        } else if report.action.is_skip() {
            "SKIP"
        } else {
            " OK "
        };
        let _ = write!(out, "  [{marker}] {} {}", report.name, report.action.as_str());
        match report.action {
            UnitAction::Executed | UnitAction::RolledBack => {
                let _ = write!(
                    out,
                    " ({:.2}s, {} records)",
                    report.duration.as_secs_f64(),
                    report.records_affected
                );
            }
            _ => {}
        }
        if let Some(error) = &report.error {
            let _ = write!(out, ": {error}");
        }
        out.push('\n');
    }

    if !summary.errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        for error in &summary.errors {
            let _ = writeln!(out, "  - {error}");
        }
    }
    out
}

pub fn render_refresh(summary: &RefreshSummary) -> String {
    let mut out = render_summary("Rollback", &summary.rollback);
    out.push_str(&render_summary("Run", &summary.run));
    out
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Seeders: {} total, {} executed, {} pending",
        report.total, report.executed, report.pending
    );

    for (heading, names) in [
        ("Executed", &report.completed),
        ("Pending", &report.pending_list),
        ("Changed since last run", &report.changed),
    ] {
        if names.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{heading}:");
        for name in names {
            let _ = writeln!(out, "  - {name}");
        }
    }

    if let Some(stats) = &report.statistics {
        let _ = writeln!(out, "Statistics:");
        let _ = writeln!(
            out,
            "  Executions: {} ({} completed, {} failed)",
            stats.total_executions, stats.completed, stats.failed
        );
        let _ = writeln!(
            out,
            "  Average time: {:.1}ms  Records: {}",
            stats.average_execution_time_ms, stats.total_records_affected
        );
        for (environment, counts) in &stats.environments {
            let _ = writeln!(
                out,
                "  {environment}: {} completed, {} failed",
                counts.completed, counts.failed
            );
        }
    }

    if let Some(history) = &report.history {
        let _ = writeln!(out, "History:");
        for record in history {
            let _ = writeln!(
                out,
                "  [batch {}] {} ({}) {} at {}",
                record.batch,
                record.seeder_name,
                record.environment,
                record.status.as_str(),
                record.executed_at
            );
        }
    }
    out
}

/// Registered units with their scheduling metadata.
pub fn render_list(registry: &Registry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} seeders registered", registry.len());
    for unit in registry.get_all() {
        let meta = unit.metadata();
        let _ = write!(out, "  {} (priority {})", meta.name, meta.priority);
        for (label, values) in [
            ("env", &meta.environments),
            ("deps", &meta.dependencies),
            ("tags", &meta.tags),
        ] {
            if !values.is_empty() {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                let _ = write!(out, " {label}: {}", values.join(", "));
            }
        }
        if meta.can_rollback {
            out.push_str(" [rollback]");
        }
        out.push('\n');
    }
    out
}
