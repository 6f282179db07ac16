//! Bookkeeping table shape detection and upgrade.
//!
//! Older tool versions left bookkeeping tables in other shapes. Before a
//! migrator binds its table storage, [`ensure_current_meta_schema`] checks
//! the table's column set and, for anything other than the two recognised
//! shapes, moves the table aside to `<table>Backup` and copies its rows into
//! a freshly created table in the timestamped shape. The copy runs inside
//! one transaction.

use crate::error::DbError;
use crate::interface::{ColumnSpec, QualifiedName, QueryInterface, Row, TableDescription, TableSpec};
use crate::migration::error::MigrationError;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Suffix appended to the table name when moving a legacy table aside
pub const BACKUP_SUFFIX: &str = "Backup";

/// Recognised bookkeeping table shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaShape {
    /// `{identifier}`
    NameOnly,
    /// `{identifier, createdAt, updatedAt}`
    Timestamped,
}

/// What [`ensure_current_meta_schema`] found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaSchemaOutcome {
    /// Table already in a recognised shape, left untouched
    Current(MetaShape),
    /// Legacy table moved to `backup`, `rows` rows copied into a new table
    Upgraded { backup: QualifiedName, rows: usize },
    /// Inspection failed; the table is assumed current
    Tolerated { reason: String },
}

impl MetaSchemaOutcome {
    /// Whether inserts should fill `createdAt`/`updatedAt`
    pub fn has_timestamps(&self) -> bool {
        matches!(
            self,
            MetaSchemaOutcome::Current(MetaShape::Timestamped) | MetaSchemaOutcome::Upgraded { .. }
        )
    }
}

/// Shape of a freshly created bookkeeping table
pub fn name_only_spec(table: &QualifiedName, column: &str) -> TableSpec {
    TableSpec {
        table: table.clone(),
        columns: vec![ColumnSpec::key(column)],
    }
}

/// Shape an upgraded bookkeeping table is created in
pub fn timestamped_spec(table: &QualifiedName, column: &str) -> TableSpec {
    TableSpec {
        table: table.clone(),
        columns: vec![
            ColumnSpec::key(column),
            ColumnSpec::timestamp(CREATED_AT),
            ColumnSpec::timestamp(UPDATED_AT),
        ],
    }
}

/// Recognise `description` as one of the two current shapes
///
/// The comparison is on the exact column set: extra or missing columns make
/// the table legacy.
pub fn classify(description: &TableDescription, column: &str) -> Option<MetaShape> {
    let found: BTreeSet<&str> = description.columns.iter().map(|c| c.name.as_str()).collect();
    let name_only = BTreeSet::from([column]);
    let timestamped = BTreeSet::from([column, CREATED_AT, UPDATED_AT]);

    if found == name_only {
        Some(MetaShape::NameOnly)
    } else if found == timestamped {
        Some(MetaShape::Timestamped)
    } else {
        None
    }
}

enum Inspection {
    Missing,
    Described(TableDescription),
    Failed(DbError),
}

fn inspect(db: &dyn QueryInterface, table: &QualifiedName) -> Inspection {
    match db.list_tables(table.namespace.as_deref()) {
        Ok(tables) if !tables.iter().any(|t| t == &table.name) => return Inspection::Missing,
        Ok(_) => {}
        Err(e) => return Inspection::Failed(e),
    }
    match db.describe_table(table) {
        Ok(description) => Inspection::Described(description),
        Err(DbError::MissingTable(_)) => Inspection::Missing,
        Err(e) => Inspection::Failed(e),
    }
}

/// Bring the bookkeeping table `table` into a current shape
///
/// # Errors
///
/// - [`MigrationError::MissingTable`] when the table does not exist; the
///   caller creates it instead.
/// - [`MigrationError::UpgradeFailed`] when the upgrade of a legacy table
///   failed; the original table is left in place.
pub fn ensure_current_meta_schema(
    db: &dyn QueryInterface,
    table: &QualifiedName,
    column: &str,
) -> Result<MetaSchemaOutcome, MigrationError> {
    let description = match inspect(db, table) {
        Inspection::Missing => return Err(MigrationError::MissingTable(table.to_string())),
        Inspection::Described(description) => description,
        Inspection::Failed(e) => {
            log::warn!("Could not inspect bookkeeping table {table}, assuming it is current: {e}");
            return Ok(MetaSchemaOutcome::Tolerated {
                reason: e.to_string(),
            });
        }
    };

    if let Some(shape) = classify(&description, column) {
        log::debug!("Bookkeeping table {table} is current ({shape:?})");
        return Ok(MetaSchemaOutcome::Current(shape));
    }

    log::info!(
        "Upgrading bookkeeping table {table} with columns [{}]",
        description.column_names().join(", ")
    );
    let backup = table.with_name(format!("{}{BACKUP_SUFFIX}", table.name));
    let mut copied = 0usize;

    db.transaction(&mut || {
        db.rename_table(table, &backup.name)?;
        let rows = db.select_all(&backup)?;
        db.create_table(&timestamped_spec(table, column))?;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let carried = rows
            .iter()
            .map(|row| carry_row(row, column, &now))
            .collect::<Result<Vec<_>, _>>()?;
        db.bulk_insert(table, &carried)?;
        copied = carried.len();
        Ok(())
    })
    .map_err(|source| MigrationError::UpgradeFailed {
        table: table.to_string(),
        source,
    })?;

    log::info!("Copied {copied} row(s) from {backup} into {table}");
    Ok(MetaSchemaOutcome::Upgraded {
        backup,
        rows: copied,
    })
}

/// Project a legacy row onto the timestamped shape
fn carry_row(row: &Row, column: &str, now: &str) -> Result<Row, DbError> {
    let id = match row.get(column) {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Null) | None => {
            return Err(DbError::Other(format!(
                "legacy bookkeeping row has no '{column}' value"
            )))
        }
        Some(other) => Value::String(other.to_string()),
    };

    let mut carried = Row::new();
    carried.insert(column.to_string(), id);
    for stamp in [CREATED_AT, UPDATED_AT] {
        let value = row
            .get(stamp)
            .filter(|v| v.is_string())
            .cloned()
            .unwrap_or_else(|| Value::String(now.to_string()));
        carried.insert(stamp.to_string(), value);
    }
    Ok(carried)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ColumnInfo;
    use crate::memory::{MemoryDatabase, Operation};
    use serde_json::json;

    fn description(names: &[&str]) -> TableDescription {
        TableDescription {
            columns: names
                .iter()
                .map(|n| ColumnInfo {
                    name: (*n).to_string(),
                    data_type: "character varying".into(),
                    nullable: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_classify_exact_sets() {
        assert_eq!(classify(&description(&["name"]), "name"), Some(MetaShape::NameOnly));
        assert_eq!(
            classify(&description(&["updatedAt", "name", "createdAt"]), "name"),
            Some(MetaShape::Timestamped)
        );
        assert_eq!(classify(&description(&["name", "createdAt"]), "name"), None);
        assert_eq!(classify(&description(&["name", "foo"]), "name"), None);
        assert_eq!(classify(&description(&["version"]), "name"), None);
    }

    #[test]
    fn test_missing_table_is_signalled() {
        let db = MemoryDatabase::new();
        let table = QualifiedName::new(None, "SchemaMeta");
        assert!(matches!(
            ensure_current_meta_schema(&db, &table, "name"),
            Err(MigrationError::MissingTable(_))
        ));
    }

    #[test]
    fn test_inspection_failure_is_tolerated() {
        let db = MemoryDatabase::new();
        db.fail_on(Operation::ListTables);
        let table = QualifiedName::new(None, "SchemaMeta");
        let outcome = ensure_current_meta_schema(&db, &table, "name").unwrap();
        assert!(matches!(outcome, MetaSchemaOutcome::Tolerated { .. }));
        assert!(!outcome.has_timestamps());
    }

    #[test]
    fn test_carry_row_keeps_existing_timestamps() {
        let mut row = Row::new();
        row.insert("name".into(), json!("a"));
        row.insert("createdAt".into(), json!("2020-01-01T00:00:00Z"));
        row.insert("foo".into(), json!("dropped"));

        let carried = carry_row(&row, "name", "2024-01-01T00:00:00.000Z").unwrap();
        assert_eq!(carried.len(), 3);
        assert_eq!(carried["createdAt"], json!("2020-01-01T00:00:00Z"));
        assert_eq!(carried["updatedAt"], json!("2024-01-01T00:00:00.000Z"));
        assert!(carried.get("foo").is_none());
    }

    #[test]
    fn test_failed_upgrade_leaves_original_table() {
        let db = MemoryDatabase::new();
        let table = QualifiedName::new(None, "SchemaMeta");
        let mut row = Row::new();
        row.insert("name".into(), json!("a"));
        row.insert("foo".into(), json!("x"));
        db.seed_table(&table, &["name", "foo"], vec![row]);
        db.fail_on(Operation::BulkInsert);

        let err = ensure_current_meta_schema(&db, &table, "name").unwrap_err();
        assert!(matches!(err, MigrationError::UpgradeFailed { .. }));
        assert!(db.has_table(&table));
        assert!(!db.has_table(&table.with_name("SchemaMetaBackup")));
        assert_eq!(db.rows(&table).len(), 1);
    }
}
