//! Node store - explicit node fetches and step input selection

use crate::core::{Node, NodeId, PipelineError, Relationship, Result, Step};
use crate::persistence::PersistenceBackend;
use std::sync::Arc;

/// Whether an input node already has a derived node
///
/// This is a heuristic: a step that legitimately produces no output for an
/// input leaves that input looking untreated, so it will be processed again
/// on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
    Treated,
    NotTreated,
}

/// Read access to persisted nodes
#[derive(Clone)]
pub struct NodeStore {
    backend: Arc<dyn PersistenceBackend>,
}

impl NodeStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self { backend }
    }

    /// Fetch a single node, failing when it does not exist
    pub async fn get_one(&self, id: NodeId) -> Result<Node> {
        self.backend
            .load_nodes(&[id])
            .await?
            .pop()
            .ok_or_else(|| PipelineError::not_found(format!("Node {}", id)))
    }

    /// Fetch every requested node, failing if any is absent
    pub async fn get_many(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        let nodes = self.backend.load_nodes(ids).await?;
        if nodes.len() != ids.len() {
            let missing = ids
                .iter()
                .find(|id| !nodes.iter().any(|n| n.id == **id))
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Err(PipelineError::not_found(format!("Node {}", missing)));
        }
        Ok(nodes)
    }

    /// Fetch whichever of the requested nodes exist
    pub async fn find_many(&self, ids: &[NodeId]) -> Result<Vec<Node>> {
        Ok(self.backend.load_nodes(ids).await?)
    }

    /// Input nodes of `step`, tagged by whether they were already transformed
    pub async fn input_nodes_of_step(&self, step: &Step) -> Result<Vec<(Node, Treatment)>> {
        let ids = self
            .backend
            .linked_node_ids(step.id, Relationship::Input)
            .await?;
        let nodes = self.get_many(&ids).await?;
        let treated = self.backend.nodes_with_children(&ids).await?;

        Ok(nodes
            .into_iter()
            .map(|node| {
                let tag = if treated.contains(&node.id) {
                    Treatment::Treated
                } else {
                    Treatment::NotTreated
                };
                (node, tag)
            })
            .collect())
    }

    /// Output nodes of `step`, in the order they were produced
    pub async fn output_nodes_of_step(&self, step: &Step) -> Result<Vec<Node>> {
        let ids = self
            .backend
            .linked_node_ids(step.id, Relationship::Output)
            .await?;
        self.get_many(&ids).await
    }

    /// Nodes derived from `parent`
    pub async fn children_of(&self, parent: NodeId) -> Result<Vec<Node>> {
        Ok(self.backend.children_of(parent).await?)
    }
}
