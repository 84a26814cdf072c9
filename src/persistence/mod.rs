//! Persistence layer for runs, steps, nodes and their links
//!
//! Backends expose explicit record operations. Every method that changes
//! more than one record does so atomically, so a crash between two calls
//! always leaves a consistent, resumable state.

pub mod ledger;
pub mod nodes;
#[cfg(feature = "sqlite")]
pub mod store;

pub use ledger::{Ledger, RestartPoint};
pub use nodes::{NodeStore, Treatment};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{Node, NodeId, Relationship, Run, RunId, RunStatus, Step, StepId, StepStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Insert a run and all of its steps in one transaction
    async fn create_run(&self, run: &Run, steps: &[Step]) -> Result<()>;

    async fn load_run(&self, run_id: RunId) -> Result<Option<Run>>;

    /// Most recently created runs first
    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>>;

    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()>;

    async fn load_step(&self, step_id: StepId) -> Result<Option<Step>>;

    /// Steps of a run ordered by position
    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>>;

    async fn update_step_status(&self, step_id: StepId, status: StepStatus) -> Result<()>;

    /// Step most recently moved to errored that is still errored
    async fn last_errored_step(&self) -> Result<Option<Step>>;

    /// Insert or update nodes
    async fn save_nodes(&self, nodes: &[Node]) -> Result<()>;

    /// Nodes matching `ids`, in request order; absent ids are skipped
    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>>;

    /// Link nodes to a step. Existing links are kept and keep their position.
    async fn link_nodes(
        &self,
        step_id: StepId,
        relationship: Relationship,
        node_ids: &[NodeId],
    ) -> Result<()>;

    /// Node ids linked to a step, in link order
    async fn linked_node_ids(
        &self,
        step_id: StepId,
        relationship: Relationship,
    ) -> Result<Vec<NodeId>>;

    /// Subset of `ids` that some other node names as its parent
    async fn nodes_with_children(&self, ids: &[NodeId]) -> Result<HashSet<NodeId>>;

    /// Nodes whose parent is `parent_id`
    async fn children_of(&self, parent_id: NodeId) -> Result<Vec<Node>>;

    /// Mark a step running and record its input nodes, atomically
    async fn begin_step(&self, step_id: StepId, inputs: &[Node]) -> Result<()>;

    /// Persist the result of processing one input node, atomically:
    /// the updated input, its outputs, and the output links
    async fn record_node_result(&self, step_id: StepId, input: &Node, outputs: &[Node])
        -> Result<()>;

    /// Save and link the final outputs and mark the step processed, atomically
    async fn complete_step(&self, step_id: StepId, outputs: &[Node]) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<RunId, Run>,
    run_order: Vec<RunId>,
    steps: HashMap<StepId, Step>,
    run_steps: HashMap<RunId, Vec<StepId>>,
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    links: HashMap<(StepId, Relationship), Vec<NodeId>>,
    errored_log: Vec<StepId>,
}

impl MemoryState {
    fn set_step_status(&mut self, step_id: StepId, status: StepStatus) -> Result<()> {
        let step = self
            .steps
            .get_mut(&step_id)
            .with_context(|| format!("Step {} does not exist", step_id))?;
        step.status = status;
        step.updated_at = Utc::now();
        if status == StepStatus::Errored {
            self.errored_log.push(step_id);
        }
        Ok(())
    }

    fn save_node(&mut self, node: &Node) {
        if let Some(parent) = node.parent_node_id {
            let children = self.children.entry(parent).or_default();
            if !children.contains(&node.id) {
                children.push(node.id);
            }
        }
        self.nodes.insert(node.id, node.clone());
    }

    fn link(&mut self, step_id: StepId, relationship: Relationship, node_ids: &[NodeId]) {
        let linked = self.links.entry((step_id, relationship)).or_default();
        for id in node_ids {
            if !linked.contains(id) {
                linked.push(*id);
            }
        }
    }
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryStore {
    async fn create_run(&self, run: &Run, steps: &[Step]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id) {
            anyhow::bail!("Run {} already exists", run.id);
        }
        state.runs.insert(run.id, run.clone());
        state.run_order.push(run.id);
        let ids = steps.iter().map(|s| s.id).collect();
        for step in steps {
            state.steps.insert(step.id, step.clone());
        }
        state.run_steps.insert(run.id, ids);
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<Run>> {
        let state = self.state.read().await;
        Ok(state.runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let state = self.state.read().await;
        Ok(state
            .run_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| state.runs.get(id).cloned())
            .collect())
    }

    async fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .with_context(|| format!("Run {} does not exist", run_id))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn load_step(&self, step_id: StepId) -> Result<Option<Step>> {
        let state = self.state.read().await;
        Ok(state.steps.get(&step_id).cloned())
    }

    async fn list_steps(&self, run_id: RunId) -> Result<Vec<Step>> {
        let state = self.state.read().await;
        let mut steps: Vec<Step> = state
            .run_steps
            .get(&run_id)
            .map(|ids| ids.iter().filter_map(|id| state.steps.get(id).cloned()).collect())
            .unwrap_or_default();
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn update_step_status(&self, step_id: StepId, status: StepStatus) -> Result<()> {
        let mut state = self.state.write().await;
        state.set_step_status(step_id, status)
    }

    async fn last_errored_step(&self) -> Result<Option<Step>> {
        let state = self.state.read().await;
        Ok(state
            .errored_log
            .iter()
            .rev()
            .filter_map(|id| state.steps.get(id))
            .find(|step| step.status == StepStatus::Errored)
            .cloned())
    }

    async fn save_nodes(&self, nodes: &[Node]) -> Result<()> {
        let mut state = self.state.write().await;
        for node in nodes {
            state.save_node(node);
        }
        Ok(())
    }

    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
    }

    async fn link_nodes(
        &self,
        step_id: StepId,
        relationship: Relationship,
        node_ids: &[NodeId],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.link(step_id, relationship, node_ids);
        Ok(())
    }

    async fn linked_node_ids(
        &self,
        step_id: StepId,
        relationship: Relationship,
    ) -> Result<Vec<NodeId>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .get(&(step_id, relationship))
            .cloned()
            .unwrap_or_default())
    }

    async fn nodes_with_children(&self, ids: &[NodeId]) -> Result<HashSet<NodeId>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter(|id| state.children.get(id).is_some_and(|c| !c.is_empty()))
            .copied()
            .collect())
    }

    async fn children_of(&self, parent_id: NodeId) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .children
            .get(&parent_id)
            .map(|ids| ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn begin_step(&self, step_id: StepId, inputs: &[Node]) -> Result<()> {
        let mut state = self.state.write().await;
        state.set_step_status(step_id, StepStatus::Running)?;
        for node in inputs {
            state.save_node(node);
        }
        let ids: Vec<NodeId> = inputs.iter().map(|n| n.id).collect();
        state.link(step_id, Relationship::Input, &ids);
        Ok(())
    }

    async fn record_node_result(
        &self,
        step_id: StepId,
        input: &Node,
        outputs: &[Node],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.steps.contains_key(&step_id) {
            anyhow::bail!("Step {} does not exist", step_id);
        }
        state.save_node(input);
        for node in outputs {
            state.save_node(node);
        }
        let ids: Vec<NodeId> = outputs.iter().map(|n| n.id).collect();
        state.link(step_id, Relationship::Output, &ids);
        Ok(())
    }

    async fn complete_step(&self, step_id: StepId, outputs: &[Node]) -> Result<()> {
        let mut state = self.state.write().await;
        for node in outputs {
            state.save_node(node);
        }
        let ids: Vec<NodeId> = outputs.iter().map(|n| n.id).collect();
        state.link(step_id, Relationship::Output, &ids);
        state.set_step_status(step_id, StepStatus::Processed)
    }
}
