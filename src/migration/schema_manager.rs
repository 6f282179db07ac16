//! SchemaManager - Provides methods for schema operations in migrations

use crate::error::DbError;
use crate::interface::QueryInterface;
use sea_query::{
    ColumnDef, IndexCreateStatement, IndexDropStatement, PostgresQueryBuilder, Table,
    TableAlterStatement, TableCreateStatement, TableDropStatement,
};

/// SchemaManager provides methods for performing schema operations in migrations
///
/// It borrows the migrator's [`QueryInterface`] for the duration of one step
/// and renders sea-query statements with the PostgreSQL builder. Helpers
/// that take a bare table name qualify it with the configured namespace.
pub struct SchemaManager<'a> {
    db: &'a dyn QueryInterface,
    namespace: Option<String>,
}

impl<'a> SchemaManager<'a> {
    pub fn new(db: &'a dyn QueryInterface, namespace: Option<String>) -> Self {
        Self { db, namespace }
    }

    /// Create a table
    ///
    /// # Example
    /// ```rust,no_run
    /// use sea_query::{Table, ColumnDef};
    /// # let manager: &stepwise::migration::SchemaManager<'_> = todo!();
    ///
    /// let table = Table::create()
    ///     .table("users")
    ///     .col(ColumnDef::new("id").integer().not_null().auto_increment().primary_key())
    ///     .col(ColumnDef::new("email").string().not_null().unique_key())
    ///     .to_owned();
    ///
    /// manager.create_table(table)?;
    /// # Ok::<(), stepwise::DbError>(())
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), DbError> {
        self.execute(&table.to_string(PostgresQueryBuilder))
    }

    /// Drop a table
    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), DbError> {
        self.execute(&table.to_string(PostgresQueryBuilder))
    }

    /// Alter a table
    pub fn alter_table(&self, alter: TableAlterStatement) -> Result<(), DbError> {
        self.execute(&alter.to_string(PostgresQueryBuilder))
    }

    /// Create an index
    ///
    /// # Example
    /// ```rust,no_run
    /// use sea_query::{Index, Expr};
    /// # let manager: &stepwise::migration::SchemaManager<'_> = todo!();
    ///
    /// let index = Index::create()
    ///     .name("idx_users_email")
    ///     .table("users")
    ///     .col(Expr::col("email"))
    ///     .to_owned();
    ///
    /// manager.create_index(index)?;
    /// # Ok::<(), stepwise::DbError>(())
    /// ```
    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), DbError> {
        self.execute(&index.to_string(PostgresQueryBuilder))
    }

    /// Drop an index
    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), DbError> {
        self.execute(&index.to_string(PostgresQueryBuilder))
    }

    /// Add a column to an existing table
    pub fn add_column(&self, table: &str, mut column: ColumnDef) -> Result<(), DbError> {
        let mut alter = self.alter(table);
        alter.add_column(&mut column);
        self.alter_table(alter)
    }

    /// Drop a column from an existing table
    pub fn drop_column(&self, table: &str, column: &str) -> Result<(), DbError> {
        let mut alter = self.alter(table);
        alter.drop_column(column.to_string());
        self.alter_table(alter)
    }

    /// Rename a column in an existing table
    pub fn rename_column(&self, table: &str, old_name: &str, new_name: &str) -> Result<(), DbError> {
        let mut alter = self.alter(table);
        alter.rename_column(old_name.to_string(), new_name.to_string());
        self.alter_table(alter)
    }

    /// Execute one raw SQL statement
    ///
    /// # Example
    /// ```rust,no_run
    /// # let manager: &stepwise::migration::SchemaManager<'_> = todo!();
    /// manager.execute("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\"")?;
    /// # Ok::<(), stepwise::DbError>(())
    /// ```
    pub fn execute(&self, sql: &str) -> Result<(), DbError> {
        self.db.execute(sql).map(|_| ())
    }

    /// Namespace the migrator was configured with, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Get a reference to the underlying database interface
    pub fn interface(&self) -> &dyn QueryInterface {
        self.db
    }

    fn alter(&self, table: &str) -> TableAlterStatement {
        let mut alter = Table::alter();
        match &self.namespace {
            Some(ns) => {
                alter.table((ns.clone(), table.to_string()));
            }
            None => {
                alter.table(table.to_string());
            }
        }
        alter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;

    #[test]
    fn test_statements_reach_interface() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db, None);

        let table = Table::create()
            .table("users")
            .col(ColumnDef::new("id").integer().not_null().primary_key())
            .to_owned();
        manager.create_table(table).unwrap();
        manager.drop_table(Table::drop().table("users").to_owned()).unwrap();

        let statements = db.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE \"users\""));
        assert_eq!(statements[1], "DROP TABLE \"users\"");
    }

    #[test]
    fn test_column_helpers_qualify_namespace() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db, Some("audit".to_string()));

        manager.add_column("users", ColumnDef::new("avatar_url").string().to_owned()).unwrap();
        manager.rename_column("users", "avatar_url", "avatar").unwrap();
        manager.drop_column("users", "avatar").unwrap();

        let statements = db.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.starts_with("ALTER TABLE \"audit\".\"users\"")));
        assert!(statements[0].contains("ADD COLUMN \"avatar_url\""));
        assert_eq!(manager.namespace(), Some("audit"));
    }

    #[test]
    fn test_execute_propagates_failure() {
        let db = MemoryDatabase::new();
        db.fail_statements_containing("orders");
        let manager = SchemaManager::new(&db, None);

        assert!(manager.execute("CREATE TABLE users (id int)").is_ok());
        assert!(manager.execute("CREATE TABLE orders (id int)").is_err());
    }
}
