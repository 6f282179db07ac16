//! Driver-level error type shared by every `QueryInterface` backend.

use may_postgres::error::SqlState;
use may_postgres::Error as PostgresError;
use thiserror::Error;

/// Errors raised while talking to the database
#[derive(Debug, Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] PostgresError),

    /// The named table does not exist
    #[error("Table not found: {0}")]
    MissingTable(String),

    /// A row with the same primary key is already present
    #[error("Duplicate key '{key}' in table {table}")]
    DuplicateKey { table: String, key: String },

    /// Query construction or execution error
    #[error("Query error: {0}")]
    Query(String),

    /// Row parsing/conversion error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other execution errors (also used by migration actions)
    #[error("Execution error: {0}")]
    Other(String),
}

impl DbError {
    /// Shorthand for failing a migration action with a message
    pub fn other(msg: impl Into<String>) -> Self {
        DbError::Other(msg.into())
    }
}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        DbError::Postgres(err)
    }
}

/// Whether a driver error is a primary-key / unique constraint violation
pub(crate) fn is_unique_violation(err: &PostgresError) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}
