//! CLI command definitions

use clap::Args;
use uuid::Uuid;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct GenerateCommand {
    /// Path to pipeline YAML file
    #[arg(required_unless_present_any = ["retry", "resume"])]
    pub config: Option<String>,

    /// Retry the most recently failed step
    #[arg(long, conflicts_with = "resume")]
    pub retry: bool,

    /// Resume a run by id
    #[arg(long, value_name = "RUN_ID")]
    pub resume: Option<Uuid>,

    /// Nodes handed to a step at once
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: Option<u32>,

    /// Disable the step result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Only run the first N steps
    #[arg(long, value_name = "N")]
    pub pause_after: Option<usize>,
}

impl GenerateCommand {
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size.map(|n| n as usize)
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    pub config: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show past runs
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show the steps of one run
    #[arg(long)]
    pub run_id: Option<Uuid>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
