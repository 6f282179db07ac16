//! Database and bookkeeping configuration.
//!
//! [`DatabaseConfig::load`] reads one environment section (`[development]`,
//! `[test]`, ...) from a TOML file, overlaid with `STEPWISE__<ENV>__<KEY>`
//! environment variables.

use crate::interface::{Dialect, QualifiedName};
use crate::migration::UnitKind;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment used when neither `--env` nor `STEPWISE_ENV` is set
pub const DEFAULT_ENV: &str = "development";

/// Where applied identifiers are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Bookkeeping table in the target database
    Table,
    /// JSON array of identifiers in a file
    Json,
    /// Nothing is recorded; every unit is always pending
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub dialect: Dialect,
    /// Namespace holding the target tables and the bookkeeping table
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_migration_storage")]
    pub migration_storage: StorageKind,
    #[serde(default = "default_migration_table")]
    pub migration_storage_table_name: String,
    #[serde(default = "default_migration_storage_path")]
    pub migration_storage_path: PathBuf,
    #[serde(default = "default_seeder_storage")]
    pub seeder_storage: StorageKind,
    #[serde(default = "default_seeder_table")]
    pub seeder_storage_table_name: String,
    #[serde(default = "default_seeder_storage_path")]
    pub seeder_storage_path: PathBuf,
    #[serde(default = "default_column_name")]
    pub storage_column_name: String,
    #[serde(default = "default_migrations_path")]
    pub migrations_path: PathBuf,
    #[serde(default = "default_seeders_path")]
    pub seeders_path: PathBuf,
}

fn default_migration_storage() -> StorageKind {
    StorageKind::Table
}

fn default_seeder_storage() -> StorageKind {
    StorageKind::None
}

fn default_migration_table() -> String {
    "SchemaMeta".to_string()
}

fn default_seeder_table() -> String {
    "SchemaData".to_string()
}

fn default_migration_storage_path() -> PathBuf {
    PathBuf::from("stepwise-meta.json")
}

fn default_seeder_storage_path() -> PathBuf {
    PathBuf::from("stepwise-data.json")
}

fn default_column_name() -> String {
    "name".to_string()
}

fn default_migrations_path() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_seeders_path() -> PathBuf {
    PathBuf::from("seeders")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            dialect: Dialect::default(),
            schema: None,
            migration_storage: default_migration_storage(),
            migration_storage_table_name: default_migration_table(),
            migration_storage_path: default_migration_storage_path(),
            seeder_storage: default_seeder_storage(),
            seeder_storage_table_name: default_seeder_table(),
            seeder_storage_path: default_seeder_storage_path(),
            storage_column_name: default_column_name(),
            migrations_path: default_migrations_path(),
            seeders_path: default_seeders_path(),
        }
    }
}

impl DatabaseConfig {
    /// Load the `env` section of the configuration file at `path`, with
    /// `STEPWISE__<ENV>__<KEY>` environment variables taking precedence.
    pub fn load(path: &Path, env: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Environment::with_prefix("STEPWISE").separator("__"))
            .build()?;

        settings.get::<DatabaseConfig>(env).map_err(|e| {
            ConfigError::Message(format!(
                "Environment '{}' could not be loaded from {}: {}",
                env,
                path.display(),
                e
            ))
        })
    }

    /// Defaults plus an explicit connection URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Connection string: `url` when set, otherwise key-value parameters
    /// built from `host`, `port`, `username`, `password` and `database`.
    pub fn connection_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }

        let host = self.host.as_deref()?;
        let mut parts = vec![format!("host={}", kv_escape(host))];
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if let Some(user) = &self.username {
            parts.push(format!("user={}", kv_escape(user)));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", kv_escape(password)));
        }
        if let Some(database) = &self.database {
            parts.push(format!("dbname={}", kv_escape(database)));
        }
        Some(parts.join(" "))
    }

    /// Namespace to create on demand: the configured schema, unless it is
    /// the dialect's default namespace
    pub fn custom_namespace(&self) -> Option<&str> {
        self.schema
            .as_deref()
            .filter(|s| Some(*s) != self.dialect.default_namespace())
    }

    pub fn storage_kind(&self, kind: UnitKind) -> StorageKind {
        match kind {
            UnitKind::Migration => self.migration_storage,
            UnitKind::Seed => self.seeder_storage,
        }
    }

    pub fn storage_table(&self, kind: UnitKind) -> QualifiedName {
        let name = match kind {
            UnitKind::Migration => &self.migration_storage_table_name,
            UnitKind::Seed => &self.seeder_storage_table_name,
        };
        QualifiedName::new(self.schema.as_deref(), name.clone())
    }

    pub fn storage_path(&self, kind: UnitKind) -> &Path {
        match kind {
            UnitKind::Migration => &self.migration_storage_path,
            UnitKind::Seed => &self.seeder_storage_path,
        }
    }

    pub fn units_path(&self, kind: UnitKind) -> &Path {
        match kind {
            UnitKind::Migration => &self.migrations_path,
            UnitKind::Seed => &self.seeders_path,
        }
    }
}

/// Environment name from `STEPWISE_ENV`, defaulting to `development`
pub fn current_env() -> String {
    std::env::var("STEPWISE_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string())
}

fn kv_escape(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\') {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_environment_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[development]
host = "localhost"
port = 5432
username = "postgres"
password = "secret"
database = "app_dev"
schema = "audit"
seeder_storage = "table"

[production]
url = "postgresql://app:pw@db:5432/app"
"#,
        )
        .unwrap();

        let config = DatabaseConfig::load(&path, "development").unwrap();
        assert_eq!(config.schema.as_deref(), Some("audit"));
        assert_eq!(config.migration_storage, StorageKind::Table);
        assert_eq!(config.seeder_storage, StorageKind::Table);
        assert_eq!(config.migration_storage_table_name, "SchemaMeta");
        assert_eq!(
            config.connection_url().as_deref(),
            Some("host=localhost port=5432 user=postgres password=secret dbname=app_dev")
        );

        let production = DatabaseConfig::load(&path, "production").unwrap();
        assert_eq!(production.connection_url().as_deref(), Some("postgresql://app:pw@db:5432/app"));
        assert_eq!(production.seeder_storage, StorageKind::None);
    }

    #[test]
    fn test_missing_environment_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[development]\nurl = \"postgresql://a:b@c/d\"\n").unwrap();

        let err = DatabaseConfig::load(&path, "staging").unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_custom_namespace_skips_default() {
        let mut config = DatabaseConfig::from_url("postgresql://a:b@c/d");
        assert_eq!(config.custom_namespace(), None);
        config.schema = Some("public".into());
        assert_eq!(config.custom_namespace(), None);
        config.schema = Some("audit".into());
        assert_eq!(config.custom_namespace(), Some("audit"));
        assert_eq!(
            config.storage_table(UnitKind::Migration),
            QualifiedName::new(Some("audit"), "SchemaMeta")
        );
    }

    #[test]
    fn test_connection_url_quotes_values() {
        let config = DatabaseConfig {
            host: Some("db".into()),
            password: Some("two words".into()),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.connection_url().as_deref(), Some("host=db password='two words'"));
        assert_eq!(DatabaseConfig::default().connection_url(), None);
    }
}
