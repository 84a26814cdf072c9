//! Step executor - runs one step's transformation and records its progress

use crate::{
    core::{Node, NodeStatus, PipelineError, Result, Step, StepConfig, StepStatus, TransformError},
    persistence::PersistenceBackend,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Transformation that runs to completion on the calling task
pub trait SyncTransform: Send + Sync {
    /// Produce the output nodes for one input node. Returning the input
    /// itself (same id) updates it in place; returning nothing drops it.
    fn transform(&self, node: &Node) -> std::result::Result<Vec<Node>, TransformError>;
}

/// Transformation whose per-node work can be awaited concurrently
#[async_trait::async_trait]
pub trait AsyncTransform: Send + Sync {
    async fn transform(&self, node: &Node) -> std::result::Result<Vec<Node>, TransformError>;
}

/// A step's transformation logic, sync or async
#[derive(Clone)]
pub enum Transform {
    Sync(Arc<dyn SyncTransform>),
    Async(Arc<dyn AsyncTransform>),
}

impl Transform {
    pub fn sync<T: SyncTransform + 'static>(transform: T) -> Self {
        Transform::Sync(Arc::new(transform))
    }

    pub fn asynchronous<T: AsyncTransform + 'static>(transform: T) -> Self {
        Transform::Async(Arc::new(transform))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Transform::Async(_))
    }
}

/// What to do when the transformation fails for a single node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Fail the step
    #[default]
    Fail,
    /// Mark the node errored and carry on without it
    Skip,
}

/// Execution options every step accepts next to its own parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Per-node limit for async transformations
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ExecutionOptions {
    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        config.parameters()
    }
}

/// Runs a step and keeps its persisted status in line with what happened
pub struct StepExecutor {
    step: Step,
    transform: Transform,
    options: ExecutionOptions,
    backend: Arc<dyn PersistenceBackend>,
}

impl StepExecutor {
    pub fn new(
        step: Step,
        transform: Transform,
        options: ExecutionOptions,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Self {
        Self {
            step,
            transform,
            options,
            backend,
        }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn is_async(&self) -> bool {
        self.transform.is_async()
    }

    /// Execute the step over `nodes_to_process` and persist the outcome
    ///
    /// `already_processed` nodes are passed through untouched and appended
    /// to the result. `restarted` is set when the step's inputs were
    /// recorded by an earlier attempt. `batch_size` bounds how many nodes
    /// are handed to the transformation at once; `None` means all of them.
    ///
    /// Ablated outputs are persisted but left out of the returned set.
    pub async fn execute_and_update_step(
        &mut self,
        nodes_to_process: Vec<Node>,
        already_processed: Vec<Node>,
        restarted: bool,
        batch_size: Option<usize>,
    ) -> Result<Vec<Node>> {
        self.mark_running(&nodes_to_process, restarted).await?;

        info!(
            "Executing {} ({} to process, {} already processed)",
            self.step.name(),
            nodes_to_process.len(),
            already_processed.len()
        );

        let limit = batch_size
            .filter(|n| *n > 0)
            .unwrap_or(nodes_to_process.len())
            .max(1);
        let result = match &self.transform {
            Transform::Sync(t) => self.run_sync(t.clone(), nodes_to_process, limit).await,
            Transform::Async(t) => self.run_async(t.clone(), nodes_to_process, limit).await,
        };

        match result {
            Ok(mut outputs) => {
                outputs.extend(already_processed);
                self.mark_processed(&outputs).await?;
                Ok(outputs.into_iter().filter(|n| !n.ablated).collect())
            }
            Err(e) => {
                self.mark_errored().await;
                Err(e)
            }
        }
    }

    /// Complete the step with outputs computed earlier for the same inputs
    pub async fn replay(&mut self, inputs: &[Node], outputs: Vec<Node>) -> Result<Vec<Node>> {
        self.mark_running(inputs, false).await?;
        self.mark_processed(&outputs).await?;
        Ok(outputs.into_iter().filter(|n| !n.ablated).collect())
    }

    async fn mark_running(&mut self, inputs: &[Node], restarted: bool) -> Result<()> {
        self.step.advance(StepStatus::Running)?;
        if restarted {
            self.backend
                .update_step_status(self.step.id, StepStatus::Running)
                .await?;
        } else {
            self.backend.begin_step(self.step.id, inputs).await?;
        }
        Ok(())
    }

    async fn mark_processed(&mut self, outputs: &[Node]) -> Result<()> {
        self.step.advance(StepStatus::Processed)?;
        self.backend.complete_step(self.step.id, outputs).await?;
        debug!(step = %self.step.name(), outputs = outputs.len(), "Step processed");
        Ok(())
    }

    async fn mark_errored(&mut self) {
        if let Err(e) = self.step.advance(StepStatus::Errored) {
            warn!("{}", e);
        }
        if let Err(e) = self
            .backend
            .update_step_status(self.step.id, StepStatus::Errored)
            .await
        {
            error!("Failed to record error for step {}: {:#}", self.step.id, e);
        }
    }

    /// Each chunk is one invocation: nothing from a failed chunk is recorded
    async fn run_sync(
        &self,
        transform: Arc<dyn SyncTransform>,
        nodes: Vec<Node>,
        chunk_size: usize,
    ) -> Result<Vec<Node>> {
        let mut outputs = Vec::with_capacity(nodes.len());
        for chunk in nodes.chunks(chunk_size) {
            let mut results = Vec::with_capacity(chunk.len());
            for node in chunk {
                match transform.transform(node) {
                    Err(e) if self.options.on_error == ErrorPolicy::Fail => {
                        return Err(self.failure(node, e));
                    }
                    result => results.push(result),
                }
            }
            for (node, result) in chunk.iter().zip(results) {
                outputs.extend(self.settle(node.clone(), result).await?);
            }
        }
        Ok(outputs)
    }

    /// At most `concurrency` nodes in flight; results are recorded in input
    /// order as they become available
    async fn run_async(
        &self,
        transform: Arc<dyn AsyncTransform>,
        nodes: Vec<Node>,
        concurrency: usize,
    ) -> Result<Vec<Node>> {
        let timeout_secs = self.options.timeout_secs;
        let mut results = std::pin::pin!(stream::iter(nodes)
            .map(|node| {
                let transform = transform.clone();
                async move {
                    let result = match timeout_secs {
                        Some(secs) => {
                            match timeout(Duration::from_secs(secs), transform.transform(&node))
                                .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(TransformError::Timeout(secs)),
                            }
                        }
                        None => transform.transform(&node).await,
                    };
                    (node, result)
                }
            })
            .buffered(concurrency));

        let mut outputs = Vec::new();
        while let Some((node, result)) = results.next().await {
            match result {
                Err(e) if self.options.on_error == ErrorPolicy::Fail => {
                    return Err(self.failure(&node, e));
                }
                result => outputs.extend(self.settle(node, result).await?),
            }
        }
        Ok(outputs)
    }

    /// Persist the outcome for one input node
    async fn settle(
        &self,
        mut input: Node,
        result: std::result::Result<Vec<Node>, TransformError>,
    ) -> Result<Vec<Node>> {
        let outputs = match result {
            Ok(outputs) => {
                input.status = NodeStatus::Processed;
                outputs
                    .into_iter()
                    .map(|mut n| {
                        n.status = NodeStatus::Pending;
                        n
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Skipping node {} in {}: {}", input.id, self.step.name(), e);
                input.status = NodeStatus::Errored;
                input.annotate(self.step.name(), serde_json::json!({ "error": e.to_string() }));
                Vec::new()
            }
        };

        self.backend
            .record_node_result(self.step.id, &input, &outputs)
            .await?;
        Ok(outputs)
    }

    fn failure(&self, node: &Node, error: TransformError) -> PipelineError {
        error!("Step {} failed on node {}: {}", self.step.name(), node.id, error);
        PipelineError::Transform {
            step: self.step.name(),
            source: error,
        }
    }
}
