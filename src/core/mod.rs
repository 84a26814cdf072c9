//! Core domain models
//!
//! Runs own an ordered list of steps; steps and nodes are linked through
//! input/output relationships kept by the persistence layer.

pub mod config;
pub mod error;
pub mod node;
pub mod run;
pub mod state;
pub mod step;

pub use config::{InputConfig, OutputConfig, PipelineConfig, Settings, StepConfig};
pub use error::{PipelineError, Result, TransformError};
pub use node::{Node, NodeAnnotation, NodeId};
pub use run::{Run, RunId, RunSummary};
pub use state::{NodeStatus, Relationship, RunStatus, StepStatus};
pub use step::{Step, StepId};
