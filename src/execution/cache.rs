//! Step result cache
//!
//! Results are kept for the lifetime of one orchestrator and keyed by the
//! step plus a fingerprint of its configuration and exact input set. A miss
//! is always safe: the step is simply executed.
//!
//! Step ids are unique per run and restarted steps bypass the cache, so a
//! hit needs the same step record handed the same inputs twice within one
//! process. Normal execute/retry/resume paths never do that; the cache
//! only saves work for callers that re-run a step themselves.

use crate::core::{Node, Step, StepId};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub step_id: StepId,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(step: &Step, inputs: &[Node]) -> Self {
        Self {
            step_id: step.id,
            fingerprint: fingerprint(step, inputs),
        }
    }
}

/// Hash of a step's configuration and the nodes it is given
pub fn fingerprint(step: &Step, inputs: &[Node]) -> String {
    let nodes: Vec<_> = inputs
        .iter()
        .map(|n| json!([n.id, n.value, n.ablated, n.status]))
        .collect();
    let document = json!({
        "config": step.config,
        "nodes": nodes,
    });

    let mut hasher = Sha256::new();
    hasher.update(document.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory cache of step outputs
pub struct StepCache {
    enabled: bool,
    entries: RwLock<HashMap<CacheKey, Vec<Node>>>,
}

impl StepCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Vec<Node>> {
        if !self.enabled {
            return None;
        }
        let hit = self.entries.read().await.get(key).cloned();
        if hit.is_some() {
            debug!(step_id = %key.step_id, "Step cache hit");
        }
        hit
    }

    pub async fn put(&self, key: CacheKey, result: Vec<Node>) {
        if self.enabled {
            self.entries.write().await.insert(key, result);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for StepCache {
    fn default() -> Self {
        Self::new(true)
    }
}
