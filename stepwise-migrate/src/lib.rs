//! Stepwise Migration CLI Library
//!
//! Argument definitions, subcommand handlers and the migration file
//! generator behind the `stepwise-migrate` binary.

pub mod cli;
pub mod commands;
pub mod generate;

pub use cli::{Cli, Command};
