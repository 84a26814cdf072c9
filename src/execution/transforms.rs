//! Built-in transformations

use crate::{
    core::{Node, StepConfig, TransformError},
    execution::executor::{AsyncTransform, SyncTransform},
};
use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

type TransformResult = std::result::Result<Vec<Node>, TransformError>;

/// Derives one node per input by rendering a template
///
/// `{{ value }}` is the input value; `{{ ancestors.<key> }}` reads the
/// node's lineage.
#[derive(Debug, Clone)]
pub struct TemplateTransform {
    step_name: String,
    template: String,
}

#[derive(Deserialize)]
struct TemplateParams {
    template: String,
}

impl TemplateTransform {
    pub fn new(step_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            template: template.into(),
        }
    }

    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let params: TemplateParams = config.parameters()?;
        Ok(Self::new(config.name(), params.template))
    }

    fn render(&self, node: &Node) -> String {
        let mut rendered = self.template.replace("{{ value }}", &node.value);
        for (key, value) in &node.ancestors {
            let placeholder = format!("{{{{ ancestors.{} }}}}", key);
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
        rendered
    }
}

impl SyncTransform for TemplateTransform {
    fn transform(&self, node: &Node) -> TransformResult {
        let mut derived = node.derive(self.render(node));
        derived.record_ancestor(self.step_name.clone(), json!(node.value));
        Ok(vec![derived])
    }
}

/// Derives one node per non-empty piece of the value
#[derive(Debug, Clone)]
pub struct SeparatorTransform {
    step_name: String,
    separator: String,
}

#[derive(Deserialize)]
struct SeparatorParams {
    #[serde(default = "default_separator")]
    separator: String,
}

fn default_separator() -> String {
    "\n".to_string()
}

impl SeparatorTransform {
    pub fn new(step_name: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            separator: separator.into(),
        }
    }

    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let params: SeparatorParams = config.parameters()?;
        if params.separator.is_empty() {
            anyhow::bail!("'separator' must not be empty");
        }
        Ok(Self::new(config.name(), params.separator))
    }
}

impl SyncTransform for SeparatorTransform {
    fn transform(&self, node: &Node) -> TransformResult {
        Ok(node
            .value
            .split(self.separator.as_str())
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(|piece| {
                let mut derived = node.derive(piece);
                derived.record_ancestor(self.step_name.clone(), json!(node.value));
                derived
            })
            .collect())
    }
}

/// Ablates nodes in place depending on a regex match
#[derive(Debug, Clone)]
pub struct RegexAblation {
    step_name: String,
    pattern: Regex,
    keep_matching: bool,
}

#[derive(Deserialize)]
struct RegexAblationParams {
    pattern: String,
    #[serde(default)]
    keep_matching: bool,
}

impl RegexAblation {
    pub fn new(step_name: impl Into<String>, pattern: Regex, keep_matching: bool) -> Self {
        Self {
            step_name: step_name.into(),
            pattern,
            keep_matching,
        }
    }

    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let params: RegexAblationParams = config.parameters()?;
        let pattern = Regex::new(&params.pattern)
            .with_context(|| format!("Invalid pattern '{}'", params.pattern))?;
        Ok(Self::new(config.name(), pattern, params.keep_matching))
    }
}

impl SyncTransform for RegexAblation {
    fn transform(&self, node: &Node) -> TransformResult {
        let matched = self.pattern.is_match(&node.value);
        let mut node = node.clone();
        if matched != self.keep_matching {
            let reason = if matched {
                format!("matched {}", self.pattern.as_str())
            } else {
                format!("did not match {}", self.pattern.as_str())
            };
            node.ablate(self.step_name.clone(), reason);
        }
        Ok(vec![node])
    }
}

/// Pipes each value through an external command
#[derive(Debug, Clone)]
pub struct CommandTransform {
    step_name: String,
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct CommandParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(step_name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            step_name: step_name.into(),
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &StepConfig) -> anyhow::Result<Self> {
        let params: CommandParams = config.parameters()?;
        Ok(Self::new(config.name(), params.command, params.args))
    }
}

#[async_trait::async_trait]
impl AsyncTransform for CommandTransform {
    async fn transform(&self, node: &Node) -> TransformResult {
        debug!("Spawning {} for node {}", self.program, node.id);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while draining stdout, or a value larger than the pipe
        // buffer blocks both sides
        let stdin = child.stdin.take();
        let input = node.value.as_bytes();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input).await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        // A command may exit without reading its input
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, exit_code, stderr.trim());
            return Err(TransformError::Failed(format!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout)
            .map_err(|e| TransformError::Failed(format!("Output is not UTF-8: {}", e)))?;

        let mut derived = node.derive(content.trim_end());
        derived.record_ancestor(self.step_name.clone(), json!(node.value));
        Ok(vec![derived])
    }
}
