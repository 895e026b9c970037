//! Dependency-ordered database seeding with execution tracking and rollback.
//!
//! Seed units implement [`SeedUnit`] and are collected in a [`Registry`]. The
//! [`SeedManager`] resolves their dependency order, skips units whose recorded
//! content hash still matches, runs the rest one by one inside a [`Session`]
//! transaction and records every outcome in the history table.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use seedkit::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.register(RolesSeeder::default())?;
//! registry.register(UsersSeeder::default())?;
//!
//! let session = PgSession::connect(&database_url).await?;
//! let mut manager = SeedManager::new(session, registry, SeederConfig::default());
//!
//! let summary = manager.run_all(&RunOptions::new().environment("development")).await?;
//! if !summary.is_success() {
//!     anyhow::bail!("{} seeder(s) failed", summary.failed);
//! }
//! ```

pub mod config;
pub mod errors;
pub mod hash;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod query_builder;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tracker;
pub mod unit;
pub mod upsert;

pub use config::{ConfigError, EnvironmentProfile, SeederConfig};
pub use errors::{ManagerError, SeedError, StoreError};
pub use hash::content_hash;
pub use lifecycle::{FailureKind, UnitOutcome, UnitState};
pub use manager::{
    ExecutionSummary, RefreshSummary, RollbackTarget, RunOptions, SeedManager, StatusReport,
    UnitAction, UnitReport,
};
pub use models::{ExecutionRecord, ExecutionStats, ExecutionStatus, SeedMetadata};
pub use registry::Registry;
pub use session::{MemorySession, PgSession, Row, Session};
pub use tracker::{EnvironmentCounts, Tracker, TrackerStatistics};
pub use unit::{SeedContext, SeedUnit};
pub use upsert::{UpsertAction, UpsertCounts, UpsertManager};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}

pub mod prelude {
    //! Convenient re-exports for writing seed units and driving the manager.

    pub use crate::row;
    pub use crate::{
        ExecutionSummary, ManagerError, MemorySession, PgSession, Registry, RollbackTarget, Row,
        RunOptions, SeedContext, SeedError, SeedManager, SeedMetadata, SeedUnit, SeederConfig,
        Session, UpsertAction, UpsertCounts,
    };
    pub use async_trait::async_trait;
}
