//! Subcommand handlers

use crate::cli::{Cli, Command};
use crate::generate;
use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use stepwise::migration::{
    DownOptions, MigrationError, MigrationStatus, Migrator, SqlFileLoader, UnitKind, UpOptions,
};

/// Opens a migrator for a unit kind
pub type Opener<'a> = dyn Fn(UnitKind) -> Result<Migrator, MigrationError> + 'a;

/// Run `cli.command` against a real database
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let open = |kind: UnitKind| {
        Migrator::open(kind, cli.open_options(), Box::new(SqlFileLoader::new()))
    };
    execute(cli, &open, out)
}

/// Run `cli.command`, opening migrators through `open`
pub fn execute(cli: &Cli, open: &Opener<'_>, out: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::Migrate { to } => {
            let migrator = open(UnitKind::Migration)?;
            let options = UpOptions {
                to: to.clone(),
                ..UpOptions::default()
            };
            let applied = migrator.up(&options)?;
            summary(out, "Applied", applied.len(), UnitKind::Migration)?;
            migrator.close();
        }
        Command::Status => {
            let migrator = open(UnitKind::Migration)?;
            let status = migrator.status()?;
            render_status(out, &status)?;
            migrator.close();
        }
        Command::Undo { name } => {
            revert(open, UnitKind::Migration, DownOptions::only(name.clone()), out)?;
        }
        Command::UndoAll { to } => {
            let options = match to {
                Some(to) => DownOptions::to(to.clone()),
                None => DownOptions::all(),
            };
            revert(open, UnitKind::Migration, options, out)?;
        }
        Command::SeedAll => {
            let seeder = open(UnitKind::Seed)?;
            let applied = seeder.up(&UpOptions::default())?;
            summary(out, "Applied", applied.len(), UnitKind::Seed)?;
            seeder.close();
        }
        Command::Seed { name } => {
            let seeder = open(UnitKind::Seed)?;
            let applied = seeder.up(&UpOptions::only(name.clone()))?;
            summary(out, "Applied", applied.len(), UnitKind::Seed)?;
            seeder.close();
        }
        Command::SeedUndo { name } => {
            revert(open, UnitKind::Seed, DownOptions::only(name.clone()), out)?;
        }
        Command::SeedUndoAll { to } => {
            let options = match to {
                Some(to) => DownOptions::to(to.clone()),
                None => DownOptions::all(),
            };
            revert(open, UnitKind::Seed, options, out)?;
        }
        Command::Generate { name } => {
            let dir = match &cli.migrations_path {
                Some(dir) => dir.clone(),
                None => cli
                    .open_options()
                    .resolve_config()
                    .map(|config| config.migrations_path)
                    .unwrap_or_else(|_| PathBuf::from("migrations")),
            };
            let path = generate::write_migration(&dir, name, Utc::now())?;
            writeln!(out, "{} {}", "New migration was created at".green(), path.display())?;
        }
    }
    Ok(())
}

/// Revert per `options`; an empty `only` list means the most recent unit
fn revert(open: &Opener<'_>, kind: UnitKind, options: DownOptions, out: &mut dyn Write) -> Result<()> {
    let migrator = open(kind)?;
    let reverted = migrator.down(&options)?;
    summary(out, "Reverted", reverted.len(), kind)?;
    migrator.close();
    Ok(())
}

fn summary(out: &mut dyn Write, verb: &str, count: usize, kind: UnitKind) -> Result<()> {
    if count > 0 {
        writeln!(out, "{} {count} {kind}(s)", verb.green())?;
    }
    Ok(())
}

/// Render applied and pending units, `up`/`down` per line
pub fn render_status(out: &mut dyn Write, status: &MigrationStatus) -> Result<()> {
    for record in &status.executed {
        let when = record
            .created_at
            .map(|t| format!(" ({})", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        if status.missing.contains(&record.name) {
            writeln!(out, "{}   {}{when} {}", "up".green(), record.name, "(file missing)".red())?;
        } else {
            writeln!(out, "{}   {}{when}", "up".green(), record.name)?;
        }
    }
    for id in &status.pending {
        writeln!(out, "{} {id}", "down".yellow())?;
    }
    if status.executed.is_empty() && status.pending.is_empty() {
        writeln!(out, "No migrations found.")?;
    }
    Ok(())
}
