//! Run domain model

use crate::core::{config::PipelineConfig, state::RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

/// One end-to-end execution of a pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run ID
    pub id: RunId,

    pub status: RunStatus,

    /// Validated configuration, serialized as JSON. Never changes after creation.
    pub config: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            status: RunStatus::Running,
            config: config.to_json()?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild the configuration the run was created with
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_json(&self.config)
    }
}

/// Run together with its steps, for history display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: Run,
    pub total_steps: usize,
    pub processed_steps: usize,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.processed_steps as f64 / self.total_steps as f64
    }
}
