//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepwise::migration::OpenOptions;
use stepwise::Reporter;

#[derive(Parser, Debug)]
#[command(name = "stepwise-migrate")]
#[command(about = "Schema migration tool for Stepwise")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Database connection URL, overriding the configuration file
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Configuration environment (defaults to STEPWISE_ENV or development)
    #[arg(long, global = true)]
    pub env: Option<String>,

    /// Migrations directory path
    #[arg(long, global = true)]
    pub migrations_path: Option<PathBuf>,

    /// Seeders directory path
    #[arg(long, global = true)]
    pub seeders_path: Option<PathBuf>,

    /// Verbose output, including executed statements
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply pending migrations
    #[command(name = "migrate")]
    Migrate {
        /// Stop after this migration (inclusive)
        #[arg(long)]
        to: Option<String>,
    },

    /// Show applied and pending migrations
    #[command(name = "migrate:status")]
    Status,

    /// Revert the most recent migration, or the named ones
    #[command(name = "migrate:undo")]
    Undo {
        /// Migration to revert (repeatable)
        #[arg(long)]
        name: Vec<String>,
    },

    /// Revert every migration, or back to and including `--to`
    #[command(name = "migrate:undo:all")]
    UndoAll {
        #[arg(long)]
        to: Option<String>,
    },

    /// Run every pending seeder
    #[command(name = "seed:all")]
    SeedAll,

    /// Run the named seeders
    #[command(name = "seed")]
    Seed {
        /// Seeder to run (repeatable)
        #[arg(long, required = true)]
        name: Vec<String>,
    },

    /// Revert the most recent seeder, or the named ones
    #[command(name = "seed:undo")]
    SeedUndo {
        #[arg(long)]
        name: Vec<String>,
    },

    /// Revert every seeder
    #[command(name = "seed:undo:all")]
    SeedUndoAll {
        #[arg(long)]
        to: Option<String>,
    },

    /// Generate a new SQL migration file
    #[command(name = "migration:generate")]
    Generate {
        /// Migration name (e.g. "create-users")
        name: String,
    },
}

impl Cli {
    /// Connection URL from `--url`, `STEPWISE_DATABASE_URL` or `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("STEPWISE_DATABASE_URL").ok())
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    /// Default log filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Progress reporter: plain lines on stdout unless quiet
    pub fn reporter(&self) -> Reporter {
        if self.quiet {
            Reporter::new()
        } else {
            Reporter::with_sink(|line| println!("{line}")).show_trace(self.verbose)
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            config_path: self.config.clone(),
            env: self.env.clone(),
            url: self.database_url(),
            migrations_path: self.migrations_path.clone(),
            seeders_path: self.seeders_path.clone(),
            reporter: self.reporter(),
            pattern: None,
        }
    }
}
