//! Bookkeeping stores recording which units have been applied.

use crate::error::DbError;
use crate::interface::{QualifiedName, QueryInterface, Row};
use crate::migration::error::MigrationError;
use crate::migration::meta_schema::{self, CREATED_AT, UPDATED_AT};
use crate::migration::record::AppliedRecord;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Record of applied identifiers
pub trait Storage {
    /// Create the backing store if it does not exist
    fn ensure_table(&self) -> Result<(), MigrationError>;

    /// Record `id` as applied; recording it twice is an error
    fn record_applied(&self, id: &str) -> Result<(), MigrationError>;

    /// Forget `id`; forgetting an identifier that is not recorded is a no-op
    fn record_reverted(&self, id: &str) -> Result<(), MigrationError>;

    /// Every recorded identifier, sorted
    fn list_applied(&self) -> Result<Vec<AppliedRecord>, MigrationError>;
}

/// Bookkeeping table in the target database
pub struct TableStorage<'a> {
    db: &'a dyn QueryInterface,
    table: QualifiedName,
    column: String,
    timestamps: bool,
}

impl<'a> TableStorage<'a> {
    pub fn new(db: &'a dyn QueryInterface, table: QualifiedName, column: impl Into<String>) -> Self {
        Self {
            db,
            table,
            column: column.into(),
            timestamps: false,
        }
    }

    /// Fill `createdAt`/`updatedAt` on insert
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn table(&self) -> &QualifiedName {
        &self.table
    }
}

impl Storage for TableStorage<'_> {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        self.db
            .create_table(&meta_schema::name_only_spec(&self.table, &self.column))?;
        Ok(())
    }

    fn record_applied(&self, id: &str) -> Result<(), MigrationError> {
        let mut row = Row::new();
        row.insert(self.column.clone(), Value::String(id.to_string()));
        if self.timestamps {
            let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
            row.insert(CREATED_AT.to_string(), now.clone());
            row.insert(UPDATED_AT.to_string(), now);
        }
        self.db.bulk_insert(&self.table, &[row])?;
        Ok(())
    }

    fn record_reverted(&self, id: &str) -> Result<(), MigrationError> {
        let removed = self.db.bulk_delete(&self.table, &self.column, id)?;
        if removed == 0 {
            log::warn!("'{}' was not recorded in {}, nothing to forget", id, self.table);
        }
        Ok(())
    }

    fn list_applied(&self) -> Result<Vec<AppliedRecord>, MigrationError> {
        let mut records: Vec<AppliedRecord> = self
            .db
            .select_all(&self.table)?
            .iter()
            .filter_map(|row| AppliedRecord::from_row(row, &self.column))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// JSON array of identifiers in a file
pub struct JsonStorage {
    path: PathBuf,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<String>, MigrationError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(MigrationError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            MigrationError::Storage(format!("{} is not a JSON list of names: {e}", self.path.display()))
        })
    }

    fn write(&self, ids: &[String]) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(ids)
            .map_err(|e| MigrationError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|source| MigrationError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Storage for JsonStorage {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        Ok(())
    }

    fn record_applied(&self, id: &str) -> Result<(), MigrationError> {
        let mut ids = self.read()?;
        if ids.iter().any(|existing| existing == id) {
            return Err(DbError::DuplicateKey {
                table: self.path.display().to_string(),
                key: id.to_string(),
            }
            .into());
        }
        ids.push(id.to_string());
        self.write(&ids)
    }

    fn record_reverted(&self, id: &str) -> Result<(), MigrationError> {
        let mut ids = self.read()?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() == before {
            log::warn!("'{}' was not recorded in {}, nothing to forget", id, self.path.display());
            return Ok(());
        }
        self.write(&ids)
    }

    fn list_applied(&self) -> Result<Vec<AppliedRecord>, MigrationError> {
        let mut ids = self.read()?;
        ids.sort();
        Ok(ids.into_iter().map(AppliedRecord::new).collect())
    }
}

/// Records nothing; every unit stays pending
pub struct NoneStorage;

impl Storage for NoneStorage {
    fn ensure_table(&self) -> Result<(), MigrationError> {
        Ok(())
    }

    fn record_applied(&self, _id: &str) -> Result<(), MigrationError> {
        Ok(())
    }

    fn record_reverted(&self, _id: &str) -> Result<(), MigrationError> {
        Ok(())
    }

    fn list_applied(&self) -> Result<Vec<AppliedRecord>, MigrationError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use tempfile::TempDir;

    fn meta() -> QualifiedName {
        QualifiedName::new(None, "SchemaMeta")
    }

    #[test]
    fn test_table_storage_round_trip() {
        let db = MemoryDatabase::new();
        let storage = TableStorage::new(&db, meta(), "name");
        storage.ensure_table().unwrap();
        storage.ensure_table().unwrap();

        storage.record_applied("20230102000000-b").unwrap();
        storage.record_applied("20230101000000-a").unwrap();

        let names: Vec<String> = storage.list_applied().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["20230101000000-a", "20230102000000-b"]);

        let err = storage.record_applied("20230101000000-a").unwrap_err();
        assert!(matches!(err, MigrationError::Database(DbError::DuplicateKey { .. })));

        storage.record_reverted("20230101000000-a").unwrap();
        storage.record_reverted("20230101000000-a").unwrap();
        assert_eq!(storage.list_applied().unwrap().len(), 1);
    }

    #[test]
    fn test_table_storage_fills_timestamps() {
        let db = MemoryDatabase::new();
        db.create_table(&meta_schema::timestamped_spec(&meta(), "name")).unwrap();
        let storage = TableStorage::new(&db, meta(), "name").with_timestamps(true);

        storage.record_applied("20230101000000-a").unwrap();
        let records = storage.list_applied().unwrap();
        assert!(records[0].created_at.is_some());
        assert_eq!(records[0].created_at, records[0].updated_at);
    }

    #[test]
    fn test_json_storage() {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path().join("meta.json"));
        assert!(storage.list_applied().unwrap().is_empty());

        storage.record_applied("20230102000000-b").unwrap();
        storage.record_applied("20230101000000-a").unwrap();
        assert!(storage.record_applied("20230101000000-a").is_err());

        let names: Vec<String> = storage.list_applied().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["20230101000000-a", "20230102000000-b"]);

        storage.record_reverted("20230102000000-b").unwrap();
        storage.record_reverted("missing").unwrap();
        let content = fs::read_to_string(storage.path()).unwrap();
        let stored: Vec<String> = serde_json::from_str(&content).unwrap();
        assert_eq!(stored, vec!["20230101000000-a"]);
    }

    #[test]
    fn test_json_storage_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, "{\"not\": \"a list\"}").unwrap();
        assert!(matches!(
            JsonStorage::new(path).list_applied(),
            Err(MigrationError::Storage(_))
        ));
    }

    #[test]
    fn test_none_storage_forgets_everything() {
        NoneStorage.record_applied("a").unwrap();
        assert!(NoneStorage.list_applied().unwrap().is_empty());
    }
}
