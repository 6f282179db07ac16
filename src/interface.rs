//! `QueryInterface` - the database capability the migration engine is built on.
//!
//! The engine never speaks to a driver directly. Everything it needs (running
//! DDL, inspecting tables, renaming them, creating namespaces, reading and
//! writing bookkeeping rows) goes through this trait, so the same engine runs
//! against PostgreSQL ([`crate::postgres::PostgresInterface`]) and against the
//! in-process `MemoryDatabase` (feature `test-helpers`).

use crate::error::DbError;
use serde::Deserialize;
use std::fmt;

/// A raw row: column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// SQL dialect of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Whether the dialect has database-level namespaces (schemas) that the
    /// migrator should create on demand
    pub fn supports_namespaces(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Namespace every table lives in when none is configured
    pub fn default_namespace(self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some("public"),
            Dialect::Mysql | Dialect::Sqlite => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// Table name, optionally qualified by a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_owned),
            name: name.into(),
        }
    }

    /// Same namespace, different table name
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Column types the bookkeeping tables need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    TimestampTz,
}

/// Column definition for [`TableSpec`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnSpec {
    /// Non-null unique string primary key
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::String,
            nullable: false,
            primary_key: true,
        }
    }

    /// Non-null timestamp with time zone
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::TimestampTz,
            nullable: false,
            primary_key: false,
        }
    }
}

/// Definition of a table to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: QualifiedName,
    pub columns: Vec<ColumnSpec>,
}

/// One column as reported by [`QueryInterface::describe_table`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Result of [`QueryInterface::describe_table`], columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDescription {
    pub columns: Vec<ColumnInfo>,
}

impl TableDescription {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Database capability required by the migration engine
///
/// Implementations issue every call synchronously against a single live
/// connection. Under the `may` runtime a blocking call parks the coroutine,
/// not the thread.
pub trait QueryInterface {
    /// Dialect of the connected database
    fn dialect(&self) -> Dialect;

    /// Verify the connection is usable
    fn authenticate(&self) -> Result<(), DbError>;

    /// Execute a single SQL statement, returning the number of rows affected
    fn execute(&self, sql: &str) -> Result<u64, DbError>;

    /// Names of the tables in `namespace` (the dialect default when `None`)
    fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>, DbError>;

    /// Columns of `table`; [`DbError::MissingTable`] when it does not exist
    fn describe_table(&self, table: &QualifiedName) -> Result<TableDescription, DbError>;

    /// Rename `from` to `to`, keeping its namespace
    fn rename_table(&self, from: &QualifiedName, to: &str) -> Result<(), DbError>;

    /// Names of the existing namespaces
    fn list_namespaces(&self) -> Result<Vec<String>, DbError>;

    /// Create a namespace if it does not exist
    fn create_namespace(&self, name: &str) -> Result<(), DbError>;

    /// Create a table if it does not exist
    fn create_table(&self, spec: &TableSpec) -> Result<(), DbError>;

    /// Raw select of every row in `table`
    fn select_all(&self, table: &QualifiedName) -> Result<Vec<Row>, DbError>;

    /// Insert `rows`; a primary key clash fails the whole call with
    /// [`DbError::DuplicateKey`]
    fn bulk_insert(&self, table: &QualifiedName, rows: &[Row]) -> Result<u64, DbError>;

    /// Delete rows whose `column` equals `value`
    fn bulk_delete(&self, table: &QualifiedName, column: &str, value: &str) -> Result<u64, DbError>;

    /// Run `body` atomically: everything it did is undone when it fails
    fn transaction(&self, body: &mut dyn FnMut() -> Result<(), DbError>) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_display() {
        assert_eq!(QualifiedName::new(None, "SchemaMeta").to_string(), "SchemaMeta");
        assert_eq!(
            QualifiedName::new(Some("audit"), "SchemaMeta").to_string(),
            "audit.SchemaMeta"
        );
        let backup = QualifiedName::new(Some("audit"), "SchemaMeta").with_name("SchemaMetaBackup");
        assert_eq!(backup.namespace.as_deref(), Some("audit"));
    }

    #[test]
    fn test_dialect_namespaces() {
        assert!(Dialect::Postgres.supports_namespaces());
        assert!(!Dialect::Sqlite.supports_namespaces());
        assert_eq!(Dialect::Postgres.default_namespace(), Some("public"));
        assert_eq!(Dialect::Mysql.to_string(), "mysql");
    }
}
