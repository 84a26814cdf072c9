//! Error types for pipeline execution

use crate::core::{
    run::RunId,
    state::{RunStatus, StepStatus},
    step::StepId,
};
use thiserror::Error;

/// Errors surfaced by the engine, the ledger and the node store
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Run {run} is {from} and cannot become {to}")]
    RunClosed {
        run: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Step '{step}' failed: {source}")]
    Transform {
        step: String,
        #[source]
        source: TransformError,
    },

    #[error("Failed to load input: {0:#}")]
    Input(anyhow::Error),

    #[error("Failed to save output: {0:#}")]
    Output(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Run {0} was interrupted")]
    Interrupted(RunId),

    #[error("Run {0} was interrupted while saving its output")]
    InterruptedDuringFinalization(RunId),
}

impl PipelineError {
    /// Precondition failures that are reported before the ledger is touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_) | PipelineError::InvalidConfig(_)
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        PipelineError::NotFound(what.into())
    }
}

/// Errors raised by a step's transformation logic
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0}")]
    Failed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
