//! Pipeline configuration from YAML, plus environment settings

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where the root nodes come from
    pub input: InputConfig,

    /// Ordered pipeline steps
    pub pipeline: Vec<StepConfig>,

    /// Where the final nodes go
    pub output: OutputConfig,
}

/// Input source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputConfig {
    /// Read one column of a CSV file
    Csv {
        path: String,
        #[serde(default = "default_column")]
        column: String,
    },
    /// Values listed directly in the configuration
    Inline { values: Vec<String> },
}

/// Output destination configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    /// Write values (and optionally lineage) to a CSV file
    Csv {
        path: String,
        #[serde(default)]
        include_ancestors: bool,
    },
    /// Write one JSON document per node
    Jsonl { path: String },
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step family, e.g. "split" or "ablation"
    #[serde(rename = "type")]
    pub step_type: String,

    /// Implementation within the family, e.g. "separator"
    pub method: String,

    /// Human-readable name (defaults to "<type>_<method>")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Method-specific parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn default_column() -> String {
    "value".to_string()
}

impl StepConfig {
    pub fn new(step_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            method: method.into(),
            name: None,
            parameters: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Display name of the step
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.step_type, self.method))
    }

    /// Deserialize the parameters into a method-specific struct
    pub fn parameters<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.parameters.clone()))
            .with_context(|| format!("Invalid parameters for step '{}'", self.name()))
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("The file {} doesn't exist", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("Error in YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.is_empty() {
            anyhow::bail!("Pipeline must contain at least one step");
        }

        let mut seen = HashSet::new();
        for step in &self.pipeline {
            let name = step.name();
            if !seen.insert(name.clone()) {
                anyhow::bail!("Duplicate step name: {}", name);
            }
        }

        Ok(())
    }

    /// Serialize for storage on a run
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize pipeline config")
    }

    /// Deserialize a configuration stored on a run
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Stored pipeline config is unreadable")
    }

    /// Keep only the first `step_count` steps ("pause after step N")
    ///
    /// Returns false and leaves the pipeline untouched when it is not
    /// longer than `step_count`.
    pub fn truncate(&mut self, step_count: usize) -> bool {
        if step_count == 0 || step_count >= self.pipeline.len() {
            if step_count > self.pipeline.len() {
                warn!(
                    "pause after step {} is greater than the number of steps ({})",
                    step_count,
                    self.pipeline.len()
                );
            }
            return false;
        }
        self.pipeline.truncate(step_count);
        true
    }
}

/// Process-wide settings read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Database file (NODELINE_DB_PATH)
    pub db_path: Option<PathBuf>,

    /// Print each step before it executes (NODELINE_DEBUG)
    pub debug: bool,

    /// Use the per-run step cache (NODELINE_ENABLE_CACHE)
    pub enable_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: None,
            debug: false,
            enable_cache: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = Self::default();
        Self {
            db_path: lookup("NODELINE_DB_PATH").map(PathBuf::from),
            debug: lookup("NODELINE_DEBUG")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.debug),
            enable_cache: lookup("NODELINE_ENABLE_CACHE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.enable_cache),
        }
    }

    /// Resolve the database path, creating the parent directory
    pub fn database_path(&self) -> Result<PathBuf> {
        let path = match &self.db_path {
            Some(path) => path.clone(),
            None => {
                let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
                data_dir.join("nodeline").join("nodeline.db")
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        Ok(path)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
