//! Status models for runs, steps and nodes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run is executing (or was when the process died)
    Running,
    /// All steps completed and the output was saved
    Finished,
    /// An unhandled failure occurred
    Errored,
    /// The user asked to stop the run
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Errored => "errored",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "finished" => Some(RunStatus::Finished),
            "errored" => Some(RunStatus::Errored),
            "stopped" => Some(RunStatus::Stopped),
            _ => None,
        }
    }

    /// Whether a run in this state can be picked up again by resume
    pub fn is_resumable(&self) -> bool {
        !matches!(self, RunStatus::Finished)
    }
}

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Processed,
    Errored,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Processed => "processed",
            StepStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "processed" => Some(StepStatus::Processed),
            "errored" => Some(StepStatus::Errored),
            _ => None,
        }
    }

    /// Check if a transition to `next` is allowed
    ///
    /// Statuses only move forward, except that a running or errored step
    /// may be re-entered (set back to running) on retry or resume.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Running) | (Errored, Running) => true,
            (Running, Processed) | (Running, Errored) => true,
            _ => false,
        }
    }
}

/// Status of a node relative to the step currently consuming it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Processed,
    Errored,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Processed => "processed",
            NodeStatus::Errored => "errored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeStatus::Pending),
            "processed" => Some(NodeStatus::Processed),
            "errored" => Some(NodeStatus::Errored),
            _ => None,
        }
    }
}

/// Discriminator on the step/node link table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Input,
    Output,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Input => "input",
            Relationship::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Relationship::Input),
            "output" => Some(Relationship::Output),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
