//! `migration:generate` - timestamped SQL migration skeletons

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Normalise a migration name to lowercase words joined by `-`
pub fn slug(name: &str) -> Result<String> {
    let separators = Regex::new(r"[^a-z0-9]+")?;
    let lowered = name.trim().to_lowercase();
    let slug = separators.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        bail!("migration name '{name}' has no letters or digits");
    }
    Ok(slug.to_string())
}

/// File name for a migration generated at `now`
pub fn file_name(name: &str, now: DateTime<Utc>) -> Result<String> {
    Ok(format!("{}-{}.sql", now.format("%Y%m%d%H%M%S"), slug(name)?))
}

fn template(id: &str, now: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {id}\n\
         -- Created: {}\n\
         \n\
         -- up\n\
         \n\
         \n\
         -- down\n\
         \n",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Write a new migration skeleton into `dir`, creating it if needed
pub fn write_migration(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create migrations directory {}", dir.display()))?;

    let file_name = file_name(name, now)?;
    let path = dir.join(&file_name);
    let id = file_name.trim_end_matches(".sql");

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("Failed to create migration file {}", path.display()))?;
    file.write_all(template(id, now).as_bytes())
        .with_context(|| format!("Failed to write migration file {}", path.display()))?;

    log::debug!("Generated migration {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Create Users Table").unwrap(), "create-users-table");
        assert_eq!(slug("add_email__index").unwrap(), "add-email-index");
        assert!(slug("  !!! ").is_err());
    }

    #[test]
    fn test_file_name_is_timestamp_prefixed() {
        let now = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(file_name("create users", now).unwrap(), "20230102030405-create-users.sql");
    }
}
