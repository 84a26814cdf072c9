//! Run/step ledger
//!
//! The ledger owns run and step status. It also rebuilds the state an
//! orchestrator needs to continue a run from nothing but persisted records.

use crate::core::{
    Node, NodeId, NodeStatus, PipelineConfig, PipelineError, Relationship, Result, Run, RunId,
    RunStatus, RunSummary, Step, StepStatus,
};
use crate::persistence::{NodeStore, PersistenceBackend, Treatment};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to continue a run at a step boundary
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPoint {
    pub run: Run,

    /// Nodes entering the first remaining step. Pending nodes still need
    /// processing, processed nodes pass through untouched.
    pub input_nodes: Vec<Node>,

    /// The restart step followed by every later step, in order
    pub remaining_steps: Vec<Step>,

    /// No input was ever recorded for the run; it must be loaded again
    pub reload_input: bool,
}

/// Persisted record of runs and their steps
#[derive(Clone)]
pub struct Ledger {
    backend: Arc<dyn PersistenceBackend>,
    nodes: NodeStore,
}

impl Ledger {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        let nodes = NodeStore::new(backend.clone());
        Self { backend, nodes }
    }

    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.backend
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    /// Create a run with one pending step per configured stage
    pub async fn create_with_steps(&self, config: &PipelineConfig) -> Result<(Run, Vec<Step>)> {
        if config.pipeline.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Pipeline must have at least one step".to_string(),
            ));
        }
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;

        let run = Run::new(config)?;
        let steps: Vec<Step> = config
            .pipeline
            .iter()
            .enumerate()
            .map(|(position, step_config)| Step::new(run.id, position, step_config.clone()))
            .collect();

        self.backend.create_run(&run, &steps).await?;
        info!(run_id = %run.id, steps = steps.len(), "Created run");
        Ok((run, steps))
    }

    /// Change a run's status. A finished run is closed for good.
    pub async fn update(&self, run: &mut Run, status: RunStatus) -> Result<()> {
        let persisted = self.load_run(run.id).await?;
        if persisted.status == RunStatus::Finished {
            return Err(PipelineError::RunClosed {
                run: run.id,
                from: persisted.status,
                to: status,
            });
        }

        self.backend.update_run_status(run.id, status).await?;
        debug!(run_id = %run.id, from = %persisted.status, to = %status, "Run status changed");
        run.status = status;
        Ok(())
    }

    pub async fn load_run(&self, run_id: RunId) -> Result<Run> {
        self.backend
            .load_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Run {}", run_id)))
    }

    pub async fn load_step(&self, step: &Step) -> Result<Step> {
        self.backend
            .load_step(step.id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Step {}", step.id)))
    }

    pub async fn steps(&self, run_id: RunId) -> Result<Vec<Step>> {
        Ok(self.backend.list_steps(run_id).await?)
    }

    /// Most recent runs with their step progress
    pub async fn summaries(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.backend.list_runs(limit).await?;
        let mut summaries = Vec::with_capacity(runs.len());
        for run in runs {
            let steps = self.backend.list_steps(run.id).await?;
            summaries.push(RunSummary {
                total_steps: steps.len(),
                processed_steps: steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Processed)
                    .count(),
                run,
            });
        }
        Ok(summaries)
    }

    /// The most recently errored step across all runs
    pub async fn last_failed_step(&self) -> Result<Step> {
        self.backend
            .last_errored_step()
            .await?
            .ok_or_else(|| PipelineError::not_found("Errored step"))
    }

    /// Earliest step of `run_id` that has not been processed
    ///
    /// A run that failed after its last step was processed resumes at that
    /// last step; restarting there only saves the output again.
    pub async fn step_to_resume(&self, run_id: RunId) -> Result<Step> {
        let run = self.load_run(run_id).await?;
        if run.status == RunStatus::Finished {
            return Err(PipelineError::not_found(format!(
                "Resumable step for finished run {}",
                run_id
            )));
        }

        let steps = self.steps(run_id).await?;
        let pending = steps
            .iter()
            .position(|s| s.status != StepStatus::Processed);
        match pending {
            Some(index) => Ok(steps[index].clone()),
            None => steps
                .last()
                .cloned()
                .ok_or_else(|| PipelineError::not_found(format!("Steps of run {}", run_id))),
        }
    }

    /// Record freshly loaded root nodes as the inputs of the first step
    pub async fn attach_inputs(&self, step: &Step, nodes: &[Node]) -> Result<()> {
        self.backend.save_nodes(nodes).await?;
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        self.backend
            .link_nodes(step.id, Relationship::Input, &ids)
            .await?;
        Ok(())
    }

    /// Rebuild the run, the input set and the remaining steps at `step`
    ///
    /// Only reads persisted records, so two calls for the same step return
    /// the same result. A processed step is not run again: the point starts
    /// after it, with its output as input. For the last step that leaves no
    /// remaining steps, only finalization.
    pub async fn restart_from_step(&self, step: &Step) -> Result<RestartPoint> {
        let step = self.load_step(step).await?;
        let run = self.load_run(step.run_id).await?;
        let steps = self.steps(run.id).await?;

        if step.status == StepStatus::Processed {
            let input_nodes = self.fresh_inputs(&step).await?;
            let remaining_steps: Vec<Step> = steps
                .into_iter()
                .filter(|s| s.position > step.position)
                .collect();
            debug!(
                run_id = %run.id,
                step = %step.name(),
                inputs = input_nodes.len(),
                remaining = remaining_steps.len(),
                "Restarting after processed step"
            );
            return Ok(RestartPoint {
                run,
                input_nodes,
                remaining_steps,
                reload_input: false,
            });
        }

        let recorded = self
            .backend
            .linked_node_ids(step.id, Relationship::Input)
            .await?;

        let (input_nodes, reload_input) = if !recorded.is_empty() {
            (self.recorded_inputs(&step).await?, false)
        } else if let Some(previous) = steps.iter().rev().find(|s| s.position < step.position) {
            (self.fresh_inputs(previous).await?, false)
        } else {
            (Vec::new(), true)
        };

        let remaining_steps: Vec<Step> = steps
            .into_iter()
            .filter(|s| s.position >= step.position)
            .collect();

        debug!(
            run_id = %run.id,
            step = %step.name(),
            inputs = input_nodes.len(),
            remaining = remaining_steps.len(),
            "Rebuilt restart point"
        );

        Ok(RestartPoint {
            run,
            input_nodes,
            remaining_steps,
            reload_input,
        })
    }

    /// Inputs of a step that was entered before. Work the step already did
    /// is carried over as processed nodes.
    async fn recorded_inputs(&self, step: &Step) -> Result<Vec<Node>> {
        let outputs: HashSet<NodeId> = self
            .backend
            .linked_node_ids(step.id, Relationship::Output)
            .await?
            .into_iter()
            .collect();

        let mut nodes = Vec::new();
        for (mut node, treatment) in self.nodes.input_nodes_of_step(step).await? {
            if node.ablated || node.status == NodeStatus::Errored {
                continue;
            }

            let derived: Vec<Node> = match treatment {
                Treatment::Treated => self
                    .nodes
                    .children_of(node.id)
                    .await?
                    .into_iter()
                    .filter(|child| outputs.contains(&child.id))
                    .collect(),
                Treatment::NotTreated => Vec::new(),
            };

            if !derived.is_empty() {
                nodes.extend(derived.into_iter().filter(|c| !c.ablated).map(|mut c| {
                    c.status = NodeStatus::Processed;
                    c
                }));
            } else if outputs.contains(&node.id) {
                // Updated in place by this step
                node.status = NodeStatus::Processed;
                nodes.push(node);
            } else {
                node.status = NodeStatus::Pending;
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Inputs of a step that was never entered: the previous step's output
    async fn fresh_inputs(&self, previous: &Step) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .output_nodes_of_step(previous)
            .await?
            .into_iter()
            .filter(|n| !n.ablated)
            .map(|mut n| {
                n.status = NodeStatus::Pending;
                n
            })
            .collect())
    }
}
