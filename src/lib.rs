//! # Stepwise
//!
//! Schema migration runner for PostgreSQL on the `may` coroutine runtime.
//!
//! Stepwise applies ordered, versioned changes to a database and records
//! which ones have been applied in a bookkeeping table, so re-runs only do
//! what is still pending. The engine talks to the database through the
//! [`QueryInterface`] trait: [`PostgresInterface`] in production and
//! `MemoryDatabase` in tests (feature `test-helpers`).
//!
//! See [`migration`] for the engine itself and `stepwise-migrate` for the
//! command line front end.

pub mod config;
pub mod connection;
pub mod error;
pub mod interface;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod reporter;

#[cfg(feature = "tracing")]
pub mod tracing_helpers;

pub use config::{DatabaseConfig, StorageKind};
pub use connection::{connect, ConnectionError};
pub use error::DbError;
pub use interface::{Dialect, QualifiedName, QueryInterface, Row};
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryDatabase;
pub use postgres::PostgresInterface;
pub use reporter::Reporter;
