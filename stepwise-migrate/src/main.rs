//! Stepwise Migration CLI Tool
//!
//! Command-line interface for applying, reverting and inspecting schema
//! migrations and seeders.

use clap::Parser;
use colored::Colorize;
use std::process;
use stepwise::migration::MigrationError;
use stepwise_migrate::{commands, Cli};

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter())).init();

    let mut stdout = std::io::stdout();
    if let Err(e) = commands::run(&cli, &mut stdout) {
        if let Some(usage) = e.downcast_ref::<MigrationError>().filter(|e| e.is_usage()) {
            eprintln!("{usage}");
            process::exit(1);
        }
        eprintln!("{} {e:#}", "ERROR:".red());
        process::exit(1);
    }
}
