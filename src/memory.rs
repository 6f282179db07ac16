//! In-process [`QueryInterface`] backend.
//!
//! `MemoryDatabase` keeps tables, namespaces and rows in memory, enforces
//! primary keys and NOT NULL columns, and emulates transactions with
//! snapshots. Raw statements passed to [`QueryInterface::execute`] are only
//! recorded. Clones share state, so a test can hand one clone to the
//! migrator and inspect the other.

use crate::error::DbError;
use crate::interface::{
    ColumnInfo, ColumnType, Dialect, QualifiedName, QueryInterface, Row, TableDescription,
    TableSpec,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    ListTables,
    DescribeTable,
    RenameTable,
    CreateNamespace,
    CreateTable,
    SelectAll,
    BulkInsert,
    BulkDelete,
}

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<ColumnInfo>,
    primary_key: Option<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
struct Schema {
    namespaces: BTreeSet<String>,
    tables: BTreeMap<QualifiedName, MemTable>,
}

#[derive(Debug, Default)]
struct State {
    schema: Schema,
    statements: Vec<String>,
    failing_ops: HashSet<Operation>,
    failing_statements: Vec<String>,
}

/// Shared in-memory database
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    dialect: Dialect,
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// Empty database emulating PostgreSQL (namespaces, `public` default)
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Postgres)
    }

    /// Empty database emulating `dialect`
    pub fn with_dialect(dialect: Dialect) -> Self {
        let mut state = State::default();
        if let Some(ns) = dialect.default_namespace() {
            state.schema.namespaces.insert(ns.to_string());
        }
        Self {
            dialect,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn normalize(&self, table: &QualifiedName) -> QualifiedName {
        QualifiedName {
            namespace: table
                .namespace
                .clone()
                .or_else(|| self.dialect.default_namespace().map(str::to_owned)),
            name: table.name.clone(),
        }
    }

    fn check(&self, state: &State, op: Operation) -> Result<(), DbError> {
        if state.failing_ops.contains(&op) {
            return Err(DbError::Other(format!("injected failure in {op:?}")));
        }
        Ok(())
    }

    /// Make every future call of `op` fail
    pub fn fail_on(&self, op: Operation) {
        self.lock().failing_ops.insert(op);
    }

    /// Stop failing `op`
    pub fn heal(&self, op: Operation) {
        self.lock().failing_ops.remove(&op);
    }

    /// Make every future `execute` whose SQL contains `fragment` fail
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.lock().failing_statements.push(fragment.into());
    }

    /// Create a table with the given text columns and rows, bypassing checks
    ///
    /// Used to stage bookkeeping tables in shapes older tool versions left
    /// behind.
    pub fn seed_table(&self, table: &QualifiedName, columns: &[&str], rows: Vec<Row>) {
        let key = self.normalize(table);
        let columns = columns
            .iter()
            .map(|name| ColumnInfo {
                name: (*name).to_string(),
                data_type: "character varying".to_string(),
                nullable: true,
            })
            .collect();
        let mut state = self.lock();
        if let Some(ns) = &key.namespace {
            state.schema.namespaces.insert(ns.clone());
        }
        state.schema.tables.insert(
            key,
            MemTable {
                columns,
                primary_key: None,
                rows,
            },
        );
    }

    /// Snapshot of every row in `table` (empty when the table is absent)
    pub fn rows(&self, table: &QualifiedName) -> Vec<Row> {
        let key = self.normalize(table);
        self.lock()
            .schema
            .tables
            .get(&key)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Whether `table` exists
    pub fn has_table(&self, table: &QualifiedName) -> bool {
        let key = self.normalize(table);
        self.lock().schema.tables.contains_key(&key)
    }

    /// Whether `namespace` exists
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().schema.namespaces.contains(namespace)
    }

    /// Every statement passed to `execute`, in order
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryInterface for MemoryDatabase {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn authenticate(&self) -> Result<(), DbError> {
        let state = self.lock();
        self.check(&state, Operation::Authenticate)
    }

    fn execute(&self, sql: &str) -> Result<u64, DbError> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        if let Some(fragment) = state.failing_statements.iter().find(|f| sql.contains(f.as_str())) {
            return Err(DbError::Other(format!("injected failure on statement containing '{fragment}'")));
        }
        Ok(0)
    }

    fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<String>, DbError> {
        let state = self.lock();
        self.check(&state, Operation::ListTables)?;
        let namespace = namespace
            .map(str::to_owned)
            .or_else(|| self.dialect.default_namespace().map(str::to_owned));
        Ok(state
            .schema
            .tables
            .keys()
            .filter(|k| k.namespace == namespace)
            .map(|k| k.name.clone())
            .collect())
    }

    fn describe_table(&self, table: &QualifiedName) -> Result<TableDescription, DbError> {
        let state = self.lock();
        self.check(&state, Operation::DescribeTable)?;
        let key = self.normalize(table);
        let found = state
            .schema
            .tables
            .get(&key)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;
        Ok(TableDescription {
            columns: found.columns.clone(),
        })
    }

    fn rename_table(&self, from: &QualifiedName, to: &str) -> Result<(), DbError> {
        let mut state = self.lock();
        self.check(&state, Operation::RenameTable)?;
        let source = self.normalize(from);
        let target = source.with_name(to);
        if state.schema.tables.contains_key(&target) {
            return Err(DbError::Query(format!("relation \"{to}\" already exists")));
        }
        let table = state
            .schema
            .tables
            .remove(&source)
            .ok_or_else(|| DbError::MissingTable(from.to_string()))?;
        state.schema.tables.insert(target, table);
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>, DbError> {
        Ok(self.lock().schema.namespaces.iter().cloned().collect())
    }

    fn create_namespace(&self, name: &str) -> Result<(), DbError> {
        let mut state = self.lock();
        self.check(&state, Operation::CreateNamespace)?;
        state.schema.namespaces.insert(name.to_string());
        Ok(())
    }

    fn create_table(&self, spec: &TableSpec) -> Result<(), DbError> {
        let mut state = self.lock();
        self.check(&state, Operation::CreateTable)?;
        let key = self.normalize(&spec.table);

        if let Some(ns) = &key.namespace {
            if self.dialect.supports_namespaces() && !state.schema.namespaces.contains(ns) {
                return Err(DbError::Query(format!("schema \"{ns}\" does not exist")));
            }
        }
        if state.schema.tables.contains_key(&key) {
            return Ok(());
        }

        let columns = spec
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                data_type: match c.column_type {
                    ColumnType::String => "character varying".to_string(),
                    ColumnType::TimestampTz => "timestamp with time zone".to_string(),
                },
                nullable: c.nullable,
            })
            .collect();
        let primary_key = spec.columns.iter().find(|c| c.primary_key).map(|c| c.name.clone());

        state.schema.tables.insert(
            key,
            MemTable {
                columns,
                primary_key,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn select_all(&self, table: &QualifiedName) -> Result<Vec<Row>, DbError> {
        let state = self.lock();
        self.check(&state, Operation::SelectAll)?;
        let key = self.normalize(table);
        state
            .schema
            .tables
            .get(&key)
            .map(|t| t.rows.clone())
            .ok_or_else(|| DbError::MissingTable(table.to_string()))
    }

    fn bulk_insert(&self, table: &QualifiedName, rows: &[Row]) -> Result<u64, DbError> {
        let mut state = self.lock();
        self.check(&state, Operation::BulkInsert)?;
        let key = self.normalize(table);
        let target = state
            .schema
            .tables
            .get_mut(&key)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;

        let mut seen: HashSet<String> = match &target.primary_key {
            Some(pk) => target
                .rows
                .iter()
                .filter_map(|r| r.get(pk).map(|v| v.to_string()))
                .collect(),
            None => HashSet::new(),
        };

        for row in rows {
            if let Some(unknown) = row.keys().find(|k| !target.columns.iter().any(|c| &c.name == *k)) {
                return Err(DbError::Query(format!(
                    "column \"{unknown}\" of relation \"{}\" does not exist",
                    table.name
                )));
            }
            if let Some(missing) = target
                .columns
                .iter()
                .find(|c| !c.nullable && row.get(&c.name).map_or(true, |v| v.is_null()))
            {
                return Err(DbError::Query(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    missing.name
                )));
            }
            if let Some(pk) = &target.primary_key {
                let value = row.get(pk).cloned().unwrap_or_default();
                if !seen.insert(value.to_string()) {
                    return Err(DbError::DuplicateKey {
                        table: table.to_string(),
                        key: value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string()),
                    });
                }
            }
        }

        target.rows.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    fn bulk_delete(&self, table: &QualifiedName, column: &str, value: &str) -> Result<u64, DbError> {
        let mut state = self.lock();
        self.check(&state, Operation::BulkDelete)?;
        let key = self.normalize(table);
        let target = state
            .schema
            .tables
            .get_mut(&key)
            .ok_or_else(|| DbError::MissingTable(table.to_string()))?;

        let before = target.rows.len();
        target
            .rows
            .retain(|row| row.get(column).and_then(|v| v.as_str()) != Some(value));
        Ok((before - target.rows.len()) as u64)
    }

    fn transaction(&self, body: &mut dyn FnMut() -> Result<(), DbError>) -> Result<(), DbError> {
        let snapshot = self.lock().schema.clone();
        let result = body();
        if result.is_err() {
            self.lock().schema = snapshot;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ColumnSpec;
    use serde_json::json;

    fn meta() -> QualifiedName {
        QualifiedName::new(None, "SchemaMeta")
    }

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        row
    }

    fn create_meta(db: &MemoryDatabase) {
        db.create_table(&TableSpec {
            table: meta(),
            columns: vec![ColumnSpec::key("name")],
        })
        .unwrap();
    }

    #[test]
    fn test_primary_key_enforced() {
        let db = MemoryDatabase::new();
        create_meta(&db);
        db.bulk_insert(&meta(), &[row("a")]).unwrap();

        let err = db.bulk_insert(&meta(), &[row("b"), row("a")]).unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey { ref key, .. } if key == "a"));
        assert_eq!(db.rows(&meta()).len(), 1, "failed batch must not insert anything");
    }

    #[test]
    fn test_transaction_rolls_back_schema() {
        let db = MemoryDatabase::new();
        create_meta(&db);

        let result = db.transaction(&mut || {
            db.rename_table(&meta(), "SchemaMetaBackup")?;
            Err(DbError::other("boom"))
        });

        assert!(result.is_err());
        assert!(db.has_table(&meta()));
        assert!(!db.has_table(&meta().with_name("SchemaMetaBackup")));
    }

    #[test]
    fn test_create_table_requires_namespace() {
        let db = MemoryDatabase::new();
        let spec = TableSpec {
            table: QualifiedName::new(Some("audit"), "SchemaMeta"),
            columns: vec![ColumnSpec::key("name")],
        };
        assert!(db.create_table(&spec).is_err());

        db.create_namespace("audit").unwrap();
        db.create_table(&spec).unwrap();
        assert_eq!(db.list_tables(Some("audit")).unwrap(), vec!["SchemaMeta"]);
        assert!(db.list_tables(None).unwrap().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let db = MemoryDatabase::new();
        db.fail_on(Operation::ListTables);
        assert!(db.list_tables(None).is_err());
        db.heal(Operation::ListTables);
        assert!(db.list_tables(None).is_ok());

        db.fail_statements_containing("DROP");
        assert!(db.execute("CREATE TABLE x (id int)").is_ok());
        assert!(db.execute("DROP TABLE x").is_err());
        assert_eq!(db.statements().len(), 2);
    }
}
