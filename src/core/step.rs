//! Step domain model

use crate::core::{
    config::StepConfig,
    error::{PipelineError, Result},
    state::StepStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type StepId = Uuid;

/// A single step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    pub id: StepId,

    /// Run owning this step
    pub run_id: Uuid,

    /// Zero-based position within the run
    pub position: usize,

    /// Configuration the executor is built from
    pub config: StepConfig,

    pub status: StepStatus,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn new(run_id: Uuid, position: usize, config: StepConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            position,
            config,
            status: StepStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    pub fn name(&self) -> String {
        self.config.name()
    }

    /// A step that was entered but did not complete
    pub fn is_incomplete(&self) -> bool {
        matches!(self.status, StepStatus::Running | StepStatus::Errored)
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn advance(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                step: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step #{} {} ({}/{}) [{}] id={}",
            self.position + 1,
            self.name(),
            self.config.step_type,
            self.config.method,
            self.status,
            self.id
        )
    }
}
