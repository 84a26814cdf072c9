//! Input loaders

use crate::core::Node;
use crate::dataset::InputLoader;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

/// Loads one column of a CSV file; the other columns become ancestors
#[derive(Debug, Clone)]
pub struct CsvInputLoader {
    path: PathBuf,
    column: String,
}

impl CsvInputLoader {
    pub fn new(path: impl Into<PathBuf>, column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            column: column.into(),
        }
    }

    fn read(&self) -> Result<Vec<Node>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let headers = reader.headers()?.clone();
        let index = headers
            .iter()
            .position(|h| h == self.column)
            .with_context(|| {
                format!(
                    "Column '{}' not found in {}",
                    self.column,
                    self.path.display()
                )
            })?;

        let mut nodes = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Bad CSV record {}", line + 1))?;
            let value = record.get(index).unwrap_or_default();
            let mut node = Node::root(value);
            for (i, (header, field)) in headers.iter().zip(record.iter()).enumerate() {
                if i != index {
                    node.record_ancestor(header, Value::String(field.to_string()));
                }
            }
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[async_trait::async_trait]
impl InputLoader for CsvInputLoader {
    async fn load(&self) -> Result<Vec<Node>> {
        let nodes = self.read()?;
        info!("Loaded {} nodes from {}", nodes.len(), self.path.display());
        Ok(nodes)
    }
}

/// Nodes held in memory. Every load returns the same nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    nodes: Vec<Node>,
}

impl MemoryInput {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn from_values<S: AsRef<str>>(values: &[S]) -> Self {
        Self::new(values.iter().map(|v| Node::root(v.as_ref())).collect())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

#[async_trait::async_trait]
impl InputLoader for MemoryInput {
    async fn load(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }
}
