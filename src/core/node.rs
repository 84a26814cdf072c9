//! Node domain model - versioned data items flowing through a pipeline

use crate::core::state::NodeStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type NodeId = Uuid;

/// A unit of data flowing through the pipeline
///
/// Nodes are never deleted. A node that should not reach later steps is
/// either ablated or marked errored, so the full lineage stays auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    /// Node this one was derived from (None for loaded roots)
    pub parent_node_id: Option<NodeId>,

    /// Opaque payload
    pub value: String,

    /// Filtered out of the pipeline by some step
    pub ablated: bool,

    /// Lineage metadata accumulated across steps, in insertion order
    pub ancestors: Map<String, Value>,

    /// Per-step annotation records
    pub node_metadata: Vec<NodeAnnotation>,

    pub status: NodeStatus,
}

/// An annotation a step attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    pub step: String,
    pub data: Value,
}

impl Node {
    /// Create a root node, as produced by an input loader
    pub fn root(value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_node_id: None,
            value: value.into(),
            ablated: false,
            ancestors: Map::new(),
            node_metadata: Vec::new(),
            status: NodeStatus::Pending,
        }
    }

    /// Derive a child node carrying this node's lineage
    pub fn derive(&self, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_node_id: Some(self.id),
            value: value.into(),
            ablated: false,
            ancestors: self.ancestors.clone(),
            node_metadata: Vec::new(),
            status: NodeStatus::Pending,
        }
    }

    /// Record a lineage entry. Existing entries are never overwritten.
    pub fn record_ancestor(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.ancestors.contains_key(&key) {
            return false;
        }
        self.ancestors.insert(key, value);
        true
    }

    /// Append an annotation record for `step`
    pub fn annotate(&mut self, step: impl Into<String>, data: Value) {
        self.node_metadata.push(NodeAnnotation {
            step: step.into(),
            data,
        });
    }

    /// Mark the node as filtered out by `step`
    pub fn ablate(&mut self, step: impl Into<String>, reason: impl Into<String>) {
        self.ablated = true;
        self.annotate(step, serde_json::json!({ "ablated": reason.into() }));
    }

    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none()
    }
}
