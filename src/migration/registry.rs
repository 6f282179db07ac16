//! Migration registry for Rust-defined units

use crate::migration::error::MigrationError;
use crate::migration::unit::{Migration, MigrationLoader, MigrationUnit};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// In-process collection of migration units
///
/// The registry is an ordinary value: build one, register units on it and
/// hand it to a migrator as its loader. Units are kept sorted by identifier.
///
/// ```rust
/// use stepwise::migration::{Action, MigrationRegistry, MigrationUnit};
///
/// let mut registry = MigrationRegistry::new();
/// registry
///     .register(MigrationUnit::new(
///         "20230101000000-create-users",
///         Action::new(|manager| manager.execute("CREATE TABLE users (id SERIAL PRIMARY KEY)")),
///     ))
///     .unwrap();
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    units: BTreeMap<String, MigrationUnit>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateUnit` if a unit with the same
    /// identifier is already registered.
    pub fn register(&mut self, unit: MigrationUnit) -> Result<(), MigrationError> {
        if self.units.contains_key(unit.id()) {
            return Err(MigrationError::DuplicateUnit(unit.id().to_string()));
        }
        self.units.insert(unit.id().to_string(), unit);
        Ok(())
    }

    /// Register a [`Migration`] implementation
    pub fn register_migration<M: Migration>(&mut self, migration: M) -> Result<(), MigrationError> {
        self.register(MigrationUnit::from(migration))
    }

    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Registered identifiers in order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }
}

impl MigrationLoader for MigrationRegistry {
    /// Registered units located under `dir`
    ///
    /// Units given a source file are kept when its file name matches
    /// `pattern`; units still carrying the default source are always kept.
    fn load(&self, dir: &Path, pattern: &Regex) -> Result<Vec<MigrationUnit>, MigrationError> {
        Ok(self
            .units
            .values()
            .filter_map(|unit| {
                let file_name = unit
                    .source()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(unit.id())
                    .to_string();
                let has_file = unit.source() != Path::new(unit.id());
                (!has_file || pattern.is_match(&file_name))
                    .then(|| unit.clone().with_source(dir.join(file_name)))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::unit::Action;

    fn unit(id: &str) -> MigrationUnit {
        MigrationUnit::new(id, Action::new(|_| Ok(()))).with_source(format!("{id}.rs"))
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = MigrationRegistry::new();
        registry.register(unit("20230101000000-a")).unwrap();
        let err = registry.register(unit("20230101000000-a")).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateUnit(id) if id == "20230101000000-a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_sorts_and_filters() {
        let mut registry = MigrationRegistry::new();
        registry.register(unit("20230102000000-b")).unwrap();
        registry.register(unit("20230101000000-a")).unwrap();
        registry
            .register(MigrationUnit::new("notes", Action::new(|_| Ok(()))).with_source("notes.txt"))
            .unwrap();

        let pattern = Regex::new(r"\.rs$").unwrap();
        let units = registry.load(Path::new("migrations"), &pattern).unwrap();
        let ids: Vec<&str> = units.iter().map(MigrationUnit::id).collect();
        assert_eq!(ids, vec!["20230101000000-a", "20230102000000-b"]);
        assert_eq!(units[0].source(), Path::new("migrations/20230101000000-a.rs"));
    }

    #[test]
    fn test_load_keeps_units_without_file_source() {
        let mut registry = MigrationRegistry::new();
        registry
            .register(MigrationUnit::new("20230101000000-inline", Action::new(|_| Ok(()))))
            .unwrap();

        let pattern = Regex::new(r"\.(sql|rs)$").unwrap();
        let units = registry.load(Path::new("migrations"), &pattern).unwrap();
        assert_eq!(ids_of(&units), vec!["20230101000000-inline"]);
    }

    fn ids_of(units: &[MigrationUnit]) -> Vec<&str> {
        units.iter().map(MigrationUnit::id).collect()
    }
}
