//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::error::DbError;
use crate::migration::Direction;
use config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// No configuration and no connection URL; the CLI exits on this one
    #[error("{0}")]
    Usage(String),

    /// Connecting or authenticating failed
    #[error("Unable to connect to the database: {0}")]
    Connection(#[from] ConnectionError),

    /// Database execution error outside of a migration step
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration file could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bookkeeping table does not exist (create it instead of upgrading)
    #[error("Bookkeeping table {0} does not exist")]
    MissingTable(String),

    /// Upgrading the bookkeeping table failed and was rolled back
    #[error("Upgrading bookkeeping table {table} failed, original table left in place: {source}")]
    UpgradeFailed {
        table: String,
        #[source]
        source: DbError,
    },

    /// A migration action failed
    #[error("Migration '{id}' failed ({direction}): {source}")]
    StepFailed {
        id: String,
        direction: Direction,
        #[source]
        source: DbError,
    },

    /// Two units share an identifier
    #[error("Migration '{0}' is defined more than once")]
    DuplicateUnit(String),

    /// Identifier given by the caller matches no discovered unit
    #[error("Unknown migration '{0}'")]
    UnknownUnit(String),

    /// Identifier given by the caller has not been applied
    #[error("Migration '{0}' has not been applied")]
    NotApplied(String),

    /// An applied record has no discovered unit to revert it with
    #[error("Applied migration '{0}' was not found in the migrations directory")]
    MissingUnit(String),

    /// The unit has no down action
    #[error("Migration '{0}' cannot be reverted: it has no down action")]
    Irreversible(String),

    /// Invalid migration file
    #[error("Invalid migration format: {0}")]
    InvalidFormat(String),

    /// File system error reading migrations or JSON storage
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON storage file is not a list of identifiers
    #[error("Storage error: {0}")]
    Storage(String),
}

impl MigrationError {
    /// Whether this error should end the process immediately
    pub fn is_usage(&self) -> bool {
        matches!(self, MigrationError::Usage(_))
    }

    /// Identifier of the failing unit, for step failures
    pub fn failed_unit(&self) -> Option<&str> {
        match self {
            MigrationError::StepFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}
