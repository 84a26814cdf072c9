//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{GenerateCommand, HistoryCommand, ValidateCommand};
use std::ffi::OsString;

/// Resumable data-generation pipelines over versioned nodes
#[derive(Debug, Parser, Clone)]
#[command(name = "nodeline")]
#[command(version)]
#[command(about = "Run data-generation pipelines that can be stopped, retried and resumed", long_about = None)]
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
    /// Run a pipeline, or retry/resume an earlier run
    Generate(GenerateCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show past runs
    History(HistoryCommand),
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
