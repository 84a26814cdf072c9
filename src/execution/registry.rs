//! Executor registry - builds step executors from persisted step configuration

use crate::{
    core::{PipelineConfig, PipelineError, Result, Step, StepConfig},
    execution::{
        executor::{ExecutionOptions, StepExecutor, Transform},
        transforms::{CommandTransform, RegexAblation, SeparatorTransform, TemplateTransform},
    },
    persistence::PersistenceBackend,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a transformation from a step's configuration
pub type TransformFactory = Arc<dyn Fn(&StepConfig) -> anyhow::Result<Transform> + Send + Sync>;

/// Maps `(type, method)` pairs to transformation factories
///
/// Factories only see the serialized step configuration, so a step resolves
/// to the same executor on its first run and on every resume.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<(String, String), TransformFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the transformations shipped in this crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("transform", "template", |config| {
            Ok(Transform::sync(TemplateTransform::from_config(config)?))
        });
        registry.register("split", "separator", |config| {
            Ok(Transform::sync(SeparatorTransform::from_config(config)?))
        });
        registry.register("ablation", "regex", |config| {
            Ok(Transform::sync(RegexAblation::from_config(config)?))
        });
        registry.register("custom", "command", |config| {
            Ok(Transform::asynchronous(CommandTransform::from_config(config)?))
        });
        registry
    }

    pub fn register<F>(&mut self, step_type: impl Into<String>, method: impl Into<String>, factory: F)
    where
        F: Fn(&StepConfig) -> anyhow::Result<Transform> + Send + Sync + 'static,
    {
        self.factories
            .insert((step_type.into(), method.into()), Arc::new(factory));
    }

    pub fn contains(&self, step_type: &str, method: &str) -> bool {
        self.factories
            .contains_key(&(step_type.to_string(), method.to_string()))
    }

    /// Registered `(type, method)` pairs, sorted
    pub fn methods(&self) -> Vec<(String, String)> {
        let mut methods: Vec<_> = self.factories.keys().cloned().collect();
        methods.sort();
        methods
    }

    fn transform_for(&self, config: &StepConfig) -> Result<Transform> {
        let factory = self
            .factories
            .get(&(config.step_type.clone(), config.method.clone()))
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Unknown step '{}': no executor for {}/{}",
                    config.name(),
                    config.step_type,
                    config.method
                ))
            })?;
        factory(config).map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))
    }

    /// Check that every step of `config` resolves to an executor
    pub fn validate(&self, config: &PipelineConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
        for step in &config.pipeline {
            self.transform_for(step)?;
            ExecutionOptions::from_config(step)
                .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
        }
        Ok(())
    }

    /// Build the executor for a persisted step
    pub fn build(&self, step: Step, backend: Arc<dyn PersistenceBackend>) -> Result<StepExecutor> {
        let transform = self.transform_for(&step.config)?;
        let options = ExecutionOptions::from_config(&step.config)
            .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
        Ok(StepExecutor::new(step, transform, options, backend))
    }
}
