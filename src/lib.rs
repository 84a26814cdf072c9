//! nodeline - a resumable data-generation pipeline runner over versioned nodes

pub mod cli;
pub mod core;
pub mod dataset;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::{
    Node, PipelineConfig, PipelineError, Run, RunStatus, Settings, Step, StepConfig, StepStatus,
};
pub use dataset::{Datasets, InputLoader, OutputSaver};
pub use execution::{ExecutionEngine, ExecutionEvent, ExecutorRegistry, RunOutcome};
pub use persistence::{InMemoryStore, Ledger, NodeStore, PersistenceBackend};
