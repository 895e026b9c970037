use thiserror::Error;

/// Failures of the persistence layer behind a [`crate::Session`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors raised by a seed unit's lifecycle stages.
///
/// These are expected failures: the manager records them against the unit and
/// moves on to the next one.
#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Seeder {0} validation failed")]
    ValidationFailed(String),

    #[error("Seeder {0} does not support rollback")]
    RollbackUnsupported(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Message(String),
}

impl SeedError {
    /// Builds a free-form failure, for use inside `run`/`rollback`.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// True when the error reports a missing capability rather than a runtime failure.
    pub fn is_capability_violation(&self) -> bool {
        matches!(self, Self::RollbackUnsupported(_))
    }
}

impl From<sqlx::Error> for SeedError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

impl From<serde_json::Error> for SeedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(err))
    }
}

/// Structural errors that abort an orchestration call before (or instead of)
/// running units.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Seeder not found: {0}")]
    UnknownUnit(String),

    #[error("Seeder {unit} depends on unknown seeder {dependency}")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Circular dependency detected involving: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Seeder {0} is already registered")]
    DuplicateUnit(String),

    #[error("Must specify seeders to rollback or select all executed seeders or a batch count")]
    EmptyRollbackSelection,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
