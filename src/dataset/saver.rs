//! Output savers

use crate::core::Node;
use crate::dataset::OutputSaver;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Writes node values to CSV, optionally with one column per ancestor key
#[derive(Debug, Clone)]
pub struct CsvOutputSaver {
    path: PathBuf,
    include_ancestors: bool,
}

impl CsvOutputSaver {
    pub fn new(path: impl Into<PathBuf>, include_ancestors: bool) -> Self {
        Self {
            path: path.into(),
            include_ancestors,
        }
    }

    fn columns(&self, nodes: &[Node]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        if self.include_ancestors {
            for node in nodes {
                for key in node.ancestors.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }
        columns
    }
}

#[async_trait::async_trait]
impl OutputSaver for CsvOutputSaver {
    async fn save(&self, nodes: &[Node]) -> Result<()> {
        ensure_parent(&self.path)?;
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;

        let columns = self.columns(nodes);
        let mut header = vec!["value".to_string()];
        header.extend(columns.iter().cloned());
        writer.write_record(&header)?;

        for node in nodes {
            let mut record = vec![node.value.clone()];
            for column in &columns {
                record.push(match node.ancestors.get(column) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                });
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;

        info!("Saved {} nodes to {}", nodes.len(), self.path.display());
        Ok(())
    }
}

/// Writes one JSON document per node
#[derive(Debug, Clone)]
pub struct JsonlOutputSaver {
    path: PathBuf,
}

impl JsonlOutputSaver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl OutputSaver for JsonlOutputSaver {
    async fn save(&self, nodes: &[Node]) -> Result<()> {
        ensure_parent(&self.path)?;
        let file = std::fs::File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for node in nodes {
            serde_json::to_writer(&mut writer, node)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        info!("Saved {} nodes to {}", nodes.len(), self.path.display());
        Ok(())
    }
}

/// Keeps every saved node set in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    saves: Arc<Mutex<Vec<Vec<Node>>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `save` was called
    pub async fn save_count(&self) -> usize {
        self.saves.lock().await.len()
    }

    /// The most recently saved node set
    pub async fn last(&self) -> Option<Vec<Node>> {
        self.saves.lock().await.last().cloned()
    }
}

#[async_trait::async_trait]
impl OutputSaver for MemoryOutput {
    async fn save(&self, nodes: &[Node]) -> Result<()> {
        self.saves.lock().await.push(nodes.to_vec());
        Ok(())
    }
}
