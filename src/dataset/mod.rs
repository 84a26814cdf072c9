//! Input loaders and output savers
//!
//! A fresh run gets its root nodes from an [`InputLoader`]; the final node
//! set is handed once to an [`OutputSaver`]. Both are chosen from the run's
//! configuration, so a resumed run writes to the same place.

pub mod loader;
pub mod saver;

pub use loader::{CsvInputLoader, MemoryInput};
pub use saver::{CsvOutputSaver, JsonlOutputSaver, MemoryOutput};

use crate::core::{InputConfig, Node, OutputConfig};
use anyhow::Result;
use std::sync::Arc;

/// Produces the root nodes of a run
#[async_trait::async_trait]
pub trait InputLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Node>>;
}

/// Exports the final nodes of a run
#[async_trait::async_trait]
pub trait OutputSaver: Send + Sync {
    async fn save(&self, nodes: &[Node]) -> Result<()>;
}

/// Resolves loaders and savers from configuration
pub trait Datasets: Send + Sync {
    fn loader(&self, config: &InputConfig) -> Arc<dyn InputLoader>;

    fn saver(&self, config: &OutputConfig) -> Arc<dyn OutputSaver>;
}

/// Files named in the configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDatasets;

impl Datasets for FileDatasets {
    fn loader(&self, config: &InputConfig) -> Arc<dyn InputLoader> {
        match config {
            InputConfig::Csv { path, column } => Arc::new(CsvInputLoader::new(path, column)),
            InputConfig::Inline { values } => Arc::new(MemoryInput::from_values(values)),
        }
    }

    fn saver(&self, config: &OutputConfig) -> Arc<dyn OutputSaver> {
        match config {
            OutputConfig::Csv {
                path,
                include_ancestors,
            } => Arc::new(CsvOutputSaver::new(path, *include_ancestors)),
            OutputConfig::Jsonl { path } => Arc::new(JsonlOutputSaver::new(path)),
        }
    }
}

/// Fixed loader and saver regardless of configuration
#[derive(Clone)]
pub struct FixedDatasets {
    pub input: Arc<dyn InputLoader>,
    pub output: Arc<dyn OutputSaver>,
}

impl FixedDatasets {
    pub fn new(input: Arc<dyn InputLoader>, output: Arc<dyn OutputSaver>) -> Self {
        Self { input, output }
    }
}

impl Datasets for FixedDatasets {
    fn loader(&self, _config: &InputConfig) -> Arc<dyn InputLoader> {
        self.input.clone()
    }

    fn saver(&self, _config: &OutputConfig) -> Arc<dyn OutputSaver> {
        self.output.clone()
    }
}
