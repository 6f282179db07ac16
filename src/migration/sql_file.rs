//! SQL file migrations.
//!
//! A migration file holds an up section and an optional down section:
//!
//! ```sql
//! -- up
//! CREATE TABLE users (id SERIAL PRIMARY KEY, email TEXT NOT NULL);
//!
//! -- down
//! DROP TABLE users;
//! ```
//!
//! The file stem is the unit identifier, so
//! `20230101000000-create-users.sql` becomes `20230101000000-create-users`.

use crate::migration::error::MigrationError;
use crate::migration::unit::{Action, MigrationLoader, MigrationUnit};
use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default pattern for SQL migration files
pub const SQL_FILE_PATTERN: &str = r"\.sql$";

/// Loads `*.sql` migration files from a directory
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlFileLoader;

impl SqlFileLoader {
    pub fn new() -> Self {
        Self
    }

    /// Parse one migration file into a unit
    pub fn load_file(&self, path: &Path) -> Result<MigrationUnit, MigrationError> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                MigrationError::InvalidFormat(format!("{} has no usable file name", path.display()))
            })?
            .to_string();

        let content = fs::read_to_string(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let (up, down) = parse_sections(&content);
        if up.is_empty() && !has_marker(&content, "up") {
            return Err(MigrationError::InvalidFormat(format!(
                "{} has no '-- up' section",
                path.display()
            )));
        }

        let unit = MigrationUnit::new(id, statements_action(section_statements(&up)))
            .with_source(path.to_path_buf());
        Ok(if down.is_empty() && !has_marker(&content, "down") {
            unit
        } else {
            unit.with_down(statements_action(section_statements(&down)))
        })
    }
}

impl MigrationLoader for SqlFileLoader {
    /// `*.sql` files in `dir` whose name also matches `pattern`
    fn load(&self, dir: &Path, pattern: &Regex) -> Result<Vec<MigrationUnit>, MigrationError> {
        let sql_file = Regex::new(SQL_FILE_PATTERN)
            .map_err(|e| MigrationError::InvalidFormat(format!("invalid pattern: {e}")))?;
        let entries = fs::read_dir(dir).map_err(|source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| sql_file.is_match(name) && pattern.is_match(name));
            if path.is_file() && matches {
                paths.push(path);
            }
        }
        paths.sort();

        log::debug!("Found {} migration file(s) in {}", paths.len(), dir.display());
        paths.iter().map(|path| self.load_file(path)).collect()
    }
}

/// Statements of one section; an empty section is a no-op
fn section_statements(sql: &str) -> Vec<String> {
    if sql.is_empty() {
        Vec::new()
    } else {
        split_statements(sql)
    }
}

fn statements_action(statements: Vec<String>) -> Action {
    let statements = Arc::new(statements);
    Action::new(move |manager| {
        for statement in statements.iter() {
            manager.execute(statement)?;
        }
        Ok(())
    })
}

/// Split file content into its up and down SQL
///
/// Text before the first marker belongs to the up section, so a file with
/// no markers at all is an up-only migration. Comment-only lines are dropped.
pub fn parse_sections(content: &str) -> (String, String) {
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut in_down = false;

    for line in content.lines() {
        let trimmed = line.trim();
        let lowered = trimmed.to_lowercase();

        if is_marker(&lowered, "up") {
            in_down = false;
            continue;
        }
        if is_marker(&lowered, "down") {
            in_down = true;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        if in_down {
            down.push(line);
        } else {
            up.push(line);
        }
    }

    (up.join("\n").trim().to_string(), down.join("\n").trim().to_string())
}

fn has_marker(content: &str, section: &str) -> bool {
    content
        .lines()
        .any(|line| is_marker(&line.trim().to_lowercase(), section))
}

fn is_marker(lowered: &str, section: &str) -> bool {
    let Some(rest) = lowered.strip_prefix("--") else {
        return false;
    };
    let rest = rest.trim();
    rest == section
        || rest == format!("{section} migration")
        || rest == format!("+migrate {section}")
}

/// Split SQL into individual statements
///
/// Uses the PostgreSQL parser; SQL it cannot parse falls back to naive
/// semicolon splitting.
pub fn split_statements(sql: &str) -> Vec<String> {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(parsed) => parsed.iter().map(ToString::to_string).collect(),
        Err(e) => {
            log::warn!("SQL parsing failed, using naive semicolon splitting: {e}");
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        }
    }
}
