//! Migrator - Core migration execution engine

use crate::config::{current_env, DatabaseConfig, StorageKind, DEFAULT_CONFIG_PATH};
use crate::connection::ConnectionError;
use crate::interface::{Dialect, QueryInterface};
use crate::migration::error::MigrationError;
use crate::migration::meta_schema::{ensure_current_meta_schema, MetaSchemaOutcome, MetaShape};
use crate::migration::record::AppliedRecord;
use crate::migration::schema_manager::SchemaManager;
use crate::migration::status::MigrationStatus;
use crate::migration::storage::{JsonStorage, NoneStorage, Storage, TableStorage};
use crate::migration::unit::{Direction, MigrationLoader, MigrationUnit, UnitKind};
use crate::postgres::PostgresInterface;
use crate::reporter::Reporter;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::tracing_helpers;

/// File names considered by default: SQL files and Rust-defined units
pub const DEFAULT_PATTERN: &str = r"\.(sql|rs)$";

/// How to locate configuration and the database when opening a migrator
#[derive(Clone, Default)]
pub struct OpenOptions {
    /// Configuration file; defaults to `config/config.toml`
    pub config_path: Option<PathBuf>,
    /// Environment section; defaults to `STEPWISE_ENV` or `development`
    pub env: Option<String>,
    /// Connection URL overriding the configuration
    pub url: Option<String>,
    pub migrations_path: Option<PathBuf>,
    pub seeders_path: Option<PathBuf>,
    pub reporter: Reporter,
    /// File name pattern; defaults to [`DEFAULT_PATTERN`]
    pub pattern: Option<Regex>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = Some(path.into());
        self
    }

    pub fn seeders_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.seeders_path = Some(path.into());
        self
    }

    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Resolve the configuration these options point at
    ///
    /// A URL override without an explicit configuration file starts from
    /// defaults. Otherwise the configuration file must exist.
    ///
    /// # Errors
    ///
    /// `MigrationError::Usage` when there is neither a configuration file nor
    /// a URL; `MigrationError::Config` when the file cannot be read.
    pub fn resolve_config(&self) -> Result<DatabaseConfig, MigrationError> {
        let mut config = match (&self.config_path, &self.url) {
            (None, Some(url)) => DatabaseConfig::from_url(url.clone()),
            (path, url) => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
                if !path.exists() {
                    return Err(MigrationError::Usage(format!(
                        "Cannot find \"{}\". Pass --url or create a configuration file.",
                        path.display()
                    )));
                }
                let env = self.env.clone().unwrap_or_else(current_env);
                let mut config = DatabaseConfig::load(&path, &env)?;
                if let Some(url) = url {
                    config.url = Some(url.clone());
                }
                config
            }
        };

        if let Some(path) = &self.migrations_path {
            config.migrations_path = path.clone();
        }
        if let Some(path) = &self.seeders_path {
            config.seeders_path = path.clone();
        }
        Ok(config)
    }
}

/// Which units `up` applies
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Stop after this identifier (inclusive)
    pub to: Option<String>,
    /// Only apply these pending identifiers
    pub only: Vec<String>,
}

impl UpOptions {
    pub fn to(id: impl Into<String>) -> Self {
        Self {
            to: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Which applied units `down` reverts
#[derive(Debug, Clone, Default)]
pub struct DownOptions {
    /// Revert the most recent `count` units (default 1)
    pub count: Option<usize>,
    /// Revert back to and including this identifier
    pub to: Option<String>,
    /// Revert everything
    pub all: bool,
    /// Only revert these applied identifiers
    pub only: Vec<String>,
}

impl DownOptions {
    pub fn last(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn to(id: impl Into<String>) -> Self {
        Self {
            to: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Core migration execution engine
///
/// A `Migrator` owns one database connection for its whole lifetime and
/// drives one [`UnitKind`]. Opening it prepares the namespace and the
/// bookkeeping table; afterwards every call recomputes the pending set from
/// storage and the loader. Execution is strictly sequential and stops at the
/// first failing step; steps completed before it stay recorded.
pub struct Migrator {
    kind: UnitKind,
    db: Box<dyn QueryInterface>,
    config: DatabaseConfig,
    loader: Box<dyn MigrationLoader>,
    pattern: Regex,
    reporter: Reporter,
    meta: Option<MetaSchemaOutcome>,
}

impl Migrator {
    /// Resolve configuration, connect and prepare a migrator for `kind`
    pub fn open(
        kind: UnitKind,
        options: OpenOptions,
        loader: Box<dyn MigrationLoader>,
    ) -> Result<Self, MigrationError> {
        let config = options.resolve_config()?;
        if config.dialect != Dialect::Postgres {
            return Err(ConnectionError::UnsupportedDialect(config.dialect.to_string()).into());
        }
        let url = config.connection_url().ok_or_else(|| {
            MigrationError::Usage("Configuration has neither 'url' nor 'host'".to_string())
        })?;

        let db = PostgresInterface::connect(&url, options.reporter.clone()).map_err(|e| {
            options.reporter.error(&e);
            e
        })?;

        let mut migrator = Self::with_interface(kind, Box::new(db), config, loader, options.reporter)?;
        if let Some(pattern) = options.pattern {
            migrator.pattern = pattern;
        }
        Ok(migrator)
    }

    /// Prepare a migrator over an already connected interface
    pub fn with_interface(
        kind: UnitKind,
        db: Box<dyn QueryInterface>,
        config: DatabaseConfig,
        loader: Box<dyn MigrationLoader>,
        reporter: Reporter,
    ) -> Result<Self, MigrationError> {
        db.authenticate().map_err(|e| {
            reporter.error(format!("Unable to authenticate: {e}"));
            ConnectionError::Other(e.to_string())
        })?;

        let pattern = Regex::new(DEFAULT_PATTERN)
            .map_err(|e| MigrationError::InvalidFormat(format!("invalid pattern: {e}")))?;
        let mut migrator = Self {
            kind,
            db,
            config,
            loader,
            pattern,
            reporter,
            meta: None,
        };
        migrator.prepare_namespace()?;
        migrator.prepare_storage()?;
        Ok(migrator)
    }

    /// Only consider files whose name matches `pattern`
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = pattern;
        self
    }

    fn prepare_namespace(&self) -> Result<(), MigrationError> {
        if !self.db.dialect().supports_namespaces() {
            return Ok(());
        }
        let Some(namespace) = self.config.custom_namespace() else {
            return Ok(());
        };
        if self.db.list_namespaces()?.iter().any(|n| n == namespace) {
            return Ok(());
        }
        log::info!("Creating schema {namespace}");
        self.db.create_namespace(namespace)?;
        Ok(())
    }

    fn prepare_storage(&mut self) -> Result<(), MigrationError> {
        if self.config.storage_kind(self.kind) != StorageKind::Table {
            return Ok(());
        }

        let table = self.config.storage_table(self.kind);
        let column = self.config.storage_column_name.clone();
        let outcome = match ensure_current_meta_schema(self.db.as_ref(), &table, &column) {
            Ok(MetaSchemaOutcome::Upgraded { backup, rows }) => {
                self.reporter.log(&format!(
                    "Upgraded {table}; the previous table was kept as {backup} ({rows} rows copied)"
                ));
                MetaSchemaOutcome::Upgraded { backup, rows }
            }
            Ok(MetaSchemaOutcome::Tolerated { reason }) => {
                TableStorage::new(self.db.as_ref(), table, column).ensure_table()?;
                MetaSchemaOutcome::Tolerated { reason }
            }
            Ok(current) => current,
            Err(MigrationError::MissingTable(_)) => {
                log::info!("Creating bookkeeping table {table}");
                TableStorage::new(self.db.as_ref(), table, column).ensure_table()?;
                MetaSchemaOutcome::Current(MetaShape::NameOnly)
            }
            Err(e) => {
                self.reporter.error(&e);
                return Err(e);
            }
        };
        self.meta = Some(outcome);
        Ok(())
    }

    /// Storage backend bound to this migrator
    pub fn storage(&self) -> Box<dyn Storage + '_> {
        match self.config.storage_kind(self.kind) {
            StorageKind::Table => {
                let timestamps = self.meta.as_ref().is_some_and(MetaSchemaOutcome::has_timestamps);
                Box::new(
                    TableStorage::new(
                        self.db.as_ref(),
                        self.config.storage_table(self.kind),
                        self.config.storage_column_name.clone(),
                    )
                    .with_timestamps(timestamps),
                )
            }
            StorageKind::Json => Box::new(JsonStorage::new(self.config.storage_path(self.kind))),
            StorageKind::None => Box::new(NoneStorage),
        }
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn interface(&self) -> &dyn QueryInterface {
        self.db.as_ref()
    }

    /// What preparing the bookkeeping table found; `None` for file or no storage
    pub fn meta_schema(&self) -> Option<&MetaSchemaOutcome> {
        self.meta.as_ref()
    }

    /// Discovered units in identifier order
    pub fn units(&self) -> Result<Vec<MigrationUnit>, MigrationError> {
        let dir = self.config.units_path(self.kind);
        let mut units = self.loader.load(dir, &self.pattern)?;
        units.sort_by(|a, b| a.id().cmp(b.id()));
        if let Some(pair) = units.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
            return Err(MigrationError::DuplicateUnit(pair[0].id().to_string()));
        }
        Ok(units)
    }

    /// Applied records, read fresh from storage
    pub fn executed(&self) -> Result<Vec<AppliedRecord>, MigrationError> {
        self.storage().list_applied()
    }

    /// Discovered units not yet applied, in discovery order
    pub fn pending(&self) -> Result<Vec<MigrationUnit>, MigrationError> {
        let applied = self.applied_ids()?;
        Ok(self
            .units()?
            .into_iter()
            .filter(|unit| !applied.contains(unit.id()))
            .collect())
    }

    /// Executed records and pending identifiers
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let units = self.units()?;
        let executed = self.executed()?;
        let applied: HashSet<&str> = executed.iter().map(|r| r.name.as_str()).collect();
        let discovered: HashSet<&str> = units.iter().map(MigrationUnit::id).collect();

        let pending = units
            .iter()
            .filter(|u| !applied.contains(u.id()))
            .map(|u| u.id().to_string())
            .collect();
        let missing = executed
            .iter()
            .filter(|r| !discovered.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect();
        Ok(MigrationStatus::new(executed, pending, missing))
    }

    /// Apply pending units in order, returning the applied identifiers
    pub fn up(&self, options: &UpOptions) -> Result<Vec<String>, MigrationError> {
        let units = self.units()?;
        let applied = self.applied_ids()?;
        let known = |id: &str| units.iter().any(|u| u.id() == id);

        let mut selected: Vec<&MigrationUnit> =
            units.iter().filter(|u| !applied.contains(u.id())).collect();

        if !options.only.is_empty() {
            if let Some(unknown) = options.only.iter().find(|id| !known(id)) {
                return Err(MigrationError::UnknownUnit(unknown.clone()));
            }
            selected.retain(|u| options.only.iter().any(|id| id == u.id()));
        }
        if let Some(to) = &options.to {
            if !known(to) {
                return Err(MigrationError::UnknownUnit(to.clone()));
            }
            selected.retain(|u| u.id() <= to.as_str());
        }

        if selected.is_empty() {
            self.reporter
                .log(&format!("No {}s were executed, database schema was already up to date.", self.kind));
            return Ok(Vec::new());
        }

        let storage = self.storage();
        let manager = self.schema_manager();
        let mut done = Vec::with_capacity(selected.len());
        for unit in selected {
            self.run_step(unit, Direction::Up, &manager, |id| storage.record_applied(id))?;
            done.push(unit.id().to_string());
        }
        Ok(done)
    }

    /// Revert applied units, newest first, returning the reverted identifiers
    pub fn down(&self, options: &DownOptions) -> Result<Vec<String>, MigrationError> {
        let units = self.units()?;
        let by_id: HashMap<&str, &MigrationUnit> = units.iter().map(|u| (u.id(), u)).collect();
        let applied: Vec<String> = self.executed()?.into_iter().map(|r| r.name).collect();

        let mut selected: Vec<&str> = if !options.only.is_empty() {
            for id in &options.only {
                if !applied.contains(id) {
                    return Err(if by_id.contains_key(id.as_str()) {
                        MigrationError::NotApplied(id.clone())
                    } else {
                        MigrationError::UnknownUnit(id.clone())
                    });
                }
            }
            applied
                .iter()
                .filter(|id| options.only.contains(id))
                .map(String::as_str)
                .collect()
        } else if let Some(to) = &options.to {
            if !by_id.contains_key(to.as_str()) && !applied.contains(to) {
                return Err(MigrationError::UnknownUnit(to.clone()));
            }
            applied
                .iter()
                .filter(|id| id.as_str() >= to.as_str())
                .map(String::as_str)
                .collect()
        } else if options.all {
            applied.iter().map(String::as_str).collect()
        } else {
            let count = options.count.unwrap_or(1);
            applied
                .iter()
                .skip(applied.len().saturating_sub(count))
                .map(String::as_str)
                .collect()
        };
        selected.reverse();

        let mut plan = Vec::with_capacity(selected.len());
        for id in selected {
            let unit = by_id
                .get(id)
                .ok_or_else(|| MigrationError::MissingUnit(id.to_string()))?;
            if !unit.is_reversible() {
                return Err(MigrationError::Irreversible(id.to_string()));
            }
            plan.push(*unit);
        }

        if plan.is_empty() {
            self.reporter.log(&format!("No executed {}s found.", self.kind));
            return Ok(Vec::new());
        }

        let storage = self.storage();
        let manager = self.schema_manager();
        let mut done = Vec::with_capacity(plan.len());
        for unit in plan {
            self.run_step(unit, Direction::Down, &manager, |id| storage.record_reverted(id))?;
            done.push(unit.id().to_string());
        }
        Ok(done)
    }

    /// Release the connection
    pub fn close(self) {
        drop(self);
    }

    fn applied_ids(&self) -> Result<HashSet<String>, MigrationError> {
        Ok(self.executed()?.into_iter().map(|r| r.name).collect())
    }

    fn schema_manager(&self) -> SchemaManager<'_> {
        SchemaManager::new(self.db.as_ref(), self.config.schema.clone())
    }

    fn run_step(
        &self,
        unit: &MigrationUnit,
        direction: Direction,
        manager: &SchemaManager<'_>,
        record: impl FnOnce(&str) -> Result<(), MigrationError>,
    ) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migration_step_span(unit.id(), &direction.to_string()).entered();

        let action = unit
            .action(direction)
            .ok_or_else(|| MigrationError::Irreversible(unit.id().to_string()))?;
        let (before, after) = self.kind.progress(direction);

        self.reporter.log(&format!("== {}: {before} =======", unit.id()));
        let start = Instant::now();

        action.run(manager).map_err(|source| {
            self.reporter.error(format!("{} failed ({direction}): {source}", unit.id()));
            MigrationError::StepFailed {
                id: unit.id().to_string(),
                direction,
                source,
            }
        })?;
        record(unit.id())?;

        self.reporter.log(&format!(
            "== {}: {after} ({:.3}s)\n",
            unit.id(),
            start.elapsed().as_secs_f64()
        ));
        Ok(())
    }
}

impl Drop for Migrator {
    fn drop(&mut self) {
        log::debug!("Releasing {} connection", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_config_requires_file_or_url() {
        let dir = TempDir::new().unwrap();
        let options = OpenOptions::new().config_path(dir.path().join("missing.toml"));
        let err = options.resolve_config().unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_resolve_config_url_override() {
        let options = OpenOptions::new()
            .url("postgresql://app:pw@localhost/app")
            .migrations_path("db/migrate");
        let config = options.resolve_config().unwrap();
        assert_eq!(config.url.as_deref(), Some("postgresql://app:pw@localhost/app"));
        assert_eq!(config.migrations_path, PathBuf::from("db/migrate"));
        assert_eq!(config.seeders_path, PathBuf::from("seeders"));
    }

    #[test]
    fn test_resolve_config_file_with_url_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[test]\nhost = \"db\"\nschema = \"audit\"\n").unwrap();

        let config = OpenOptions::new()
            .config_path(&path)
            .env("test")
            .url("postgresql://other/db")
            .resolve_config()
            .unwrap();
        assert_eq!(config.schema.as_deref(), Some("audit"));
        assert_eq!(config.connection_url().as_deref(), Some("postgresql://other/db"));
    }

    #[test]
    fn test_down_options_constructors() {
        assert_eq!(DownOptions::last(2).count, Some(2));
        assert!(DownOptions::all().all);
        assert_eq!(DownOptions::to("x").to.as_deref(), Some("x"));
        assert_eq!(UpOptions::only(["a", "b"]).only, vec!["a", "b"]);
    }
}
