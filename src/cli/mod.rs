//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ExpandCommand, RunCommand, StatusCommand, ValidateCommand};
use std::ffi::OsString;

/// Resumable runner for multi-iteration imaging protocols
#[derive(Debug, Parser, Clone)]
#[command(name = "protorun")]
#[command(version = "0.1.0")]
#[command(about = "Resumable runner for multi-iteration imaging protocols", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run (or resume) a protocol
    Run(RunCommand),

    /// Validate a run configuration and show the step chain
    Validate(ValidateCommand),

    /// Show checkpoint progress of a run
    Status(StatusCommand),

    /// Expand compact per-iteration notation
    Expand(ExpandCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
