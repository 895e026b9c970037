//! The seed unit contract and the context it runs in.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::SeedError;
use crate::lifecycle;
use crate::models::SeedMetadata;
use crate::registry::Registry;
use crate::session::{Row, Session};
use crate::upsert::{UpsertAction, UpsertCounts, UpsertManager};

/// Nested `call`s deeper than this are refused.
const MAX_CALL_DEPTH: usize = 16;

/// A named piece of seeding logic with declared metadata.
///
/// Only [`SeedUnit::metadata`] and [`SeedUnit::run`] are required. Units that
/// set `can_rollback` should override [`SeedUnit::rollback`].
///
/// The content hash is built from [`SeedUnit::run_source`],
/// [`SeedUnit::rollback_source`] and the metadata. Returning the unit's own
/// source (`include_str!`) or a revision string there is what lets the manager
/// skip units that have not changed; without it the unit re-runs every time.
#[async_trait]
pub trait SeedUnit: Send + Sync {
    fn metadata(&self) -> &SeedMetadata;

    /// Text identifying the behaviour of [`SeedUnit::run`].
    fn run_source(&self) -> Option<&str> {
        None
    }

    /// Text identifying the behaviour of [`SeedUnit::rollback`], when overridden.
    fn rollback_source(&self) -> Option<&str> {
        None
    }

    /// Returning `Ok(false)` aborts the run before any side effect.
    async fn validate(&self, _ctx: &mut SeedContext<'_>) -> Result<bool, SeedError> {
        Ok(true)
    }

    async fn before_run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        Ok(())
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError>;

    async fn after_run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        Ok(())
    }

    async fn before_rollback(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        Ok(())
    }

    /// Reverts what [`SeedUnit::run`] wrote. Only invoked when `can_rollback` is set.
    async fn rollback(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        Ok(())
    }

    async fn after_rollback(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        Ok(())
    }
}

/// Everything a unit needs while it runs: the shared session, the target
/// environment and an affected-record counter.
pub struct SeedContext<'a> {
    session: &'a mut dyn Session,
    registry: Option<&'a Registry>,
    environment: &'a str,
    batch_size: usize,
    records_affected: u64,
    count_updates: bool,
    depth: usize,
}

impl<'a> SeedContext<'a> {
    pub fn new(session: &'a mut dyn Session, environment: &'a str) -> Self {
        Self {
            session,
            registry: None,
            environment,
            batch_size: 1000,
            records_affected: 0,
            count_updates: true,
            depth: 0,
        }
    }

    /// Makes the registry available to [`SeedContext::call`].
    pub fn with_registry(mut self, registry: &'a Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn environment(&self) -> &str {
        self.environment
    }

    /// Advisory chunk size for bulk writes, taken from the unit's metadata.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Direct access to the session for statements the helpers do not cover.
    pub fn session(&mut self) -> &mut dyn Session {
        &mut *self.session
    }

    pub fn records_affected(&self) -> u64 {
        self.records_affected
    }

    pub fn add_affected(&mut self, count: u64) {
        self.records_affected += count;
    }

    /// Whether updates count towards `records_affected` (creations always do).
    pub fn count_updates(&mut self, enabled: bool) {
        self.count_updates = enabled;
    }

    pub fn upserts(&mut self) -> UpsertManager<'_> {
        UpsertManager::new(&mut *self.session)
    }

    pub async fn get_or_create(
        &mut self,
        table: &str,
        where_: &Row,
        defaults: Option<&Row>,
    ) -> Result<(Row, bool), SeedError> {
        let (row, created) = self.upserts().get_or_create(table, where_, defaults).await?;
        if created {
            self.records_affected += 1;
        }
        Ok((row, created))
    }

    pub async fn upsert(
        &mut self,
        table: &str,
        where_: &Row,
        values: &Row,
        update_existing: bool,
    ) -> Result<(Row, UpsertAction), SeedError> {
        let (row, action) = self
            .upserts()
            .upsert(table, where_, values, update_existing)
            .await?;
        match action {
            UpsertAction::Created => self.records_affected += 1,
            UpsertAction::Updated if self.count_updates => self.records_affected += 1,
            _ => {}
        }
        Ok((row, action))
    }

    /// Bulk upsert in chunks of [`SeedContext::batch_size`].
    pub async fn bulk_upsert(
        &mut self,
        table: &str,
        rows: &[Row],
        key_fields: &[&str],
        update_fields: Option<&[&str]>,
    ) -> Result<UpsertCounts, SeedError> {
        let mut totals = UpsertCounts::default();
        for chunk in rows.chunks(self.batch_size) {
            let counts = self
                .upserts()
                .bulk_upsert(table, chunk, key_fields, update_fields)
                .await?;
            totals.created += counts.created;
            totals.updated += counts.updated;
            totals.unchanged += counts.unchanged;
        }
        self.records_affected += totals.created;
        if self.count_updates {
            self.records_affected += totals.updated;
        }
        Ok(totals)
    }

    pub async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, SeedError> {
        let stored = self.session.insert(table, row).await?;
        self.records_affected += 1;
        Ok(stored)
    }

    pub async fn select(&mut self, table: &str, filter: &Row) -> Result<Vec<Row>, SeedError> {
        Ok(self.session.select(table, filter).await?)
    }

    pub async fn delete(&mut self, table: &str, filter: &Row) -> Result<u64, SeedError> {
        let removed = self.session.delete(table, filter).await?;
        self.records_affected += removed;
        Ok(removed)
    }

    /// Runs another registered unit's full lifecycle on the same session.
    ///
    /// The nested outcome is logged only; it is not merged into this unit's
    /// counters and a nested failure does not fail the caller.
    pub fn call<'b>(&'b mut self, name: &'b str) -> Pin<Box<dyn Future<Output = ()> + Send + 'b>> {
        Box::pin(async move {
            let Some(registry) = self.registry else {
                warn!("Cannot call seeder {name}: no registry available");
                return;
            };
            let Some(unit) = registry.get(name) else {
                warn!("Cannot call seeder {name}: not registered");
                return;
            };
            if self.depth >= MAX_CALL_DEPTH {
                warn!("Cannot call seeder {name}: nesting deeper than {MAX_CALL_DEPTH}");
                return;
            }

            let mut nested = SeedContext {
                session: &mut *self.session,
                registry: self.registry,
                environment: self.environment,
                batch_size: unit.metadata().batch_size.max(1),
                records_affected: 0,
                count_updates: true,
                depth: self.depth + 1,
            };
            let outcome = lifecycle::execute(unit.as_ref(), &mut nested).await;
            match outcome.error {
                None => info!(
                    "Nested seeder {name} completed ({} records)",
                    outcome.records_affected
                ),
                Some(error) => warn!("Nested seeder {name} failed: {error}"),
            }
        })
    }
}
