//! Test utilities for nodeline
#![allow(dead_code)]

use nodeline::core::{
    InputConfig, Node, NodeId, OutputConfig, PipelineConfig, RunId, RunStatus, Step, StepConfig,
    StepStatus, TransformError,
};
use nodeline::dataset::{FixedDatasets, MemoryInput, MemoryOutput};
use nodeline::execution::{InterruptFlag, ScriptedConfirmation, SyncTransform, Transform};
use nodeline::{
    ExecutionEngine, ExecutionEvent, ExecutorRegistry, InMemoryStore, OutputSaver,
    PersistenceBackend,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One invocation of the recording transformation
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub step: String,
    pub node_id: NodeId,
    pub value: String,
}

/// State shared between a test and the transformations it registers
#[derive(Default)]
struct Controls {
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<Vec<String>>,
    interrupt_on: Mutex<Option<String>>,
    saving_fails: AtomicBool,
}

/// Memory output that refuses to save while told to
struct FlakyOutput {
    inner: MemoryOutput,
    controls: Arc<Controls>,
}

#[async_trait::async_trait]
impl OutputSaver for FlakyOutput {
    async fn save(&self, nodes: &[Node]) -> anyhow::Result<()> {
        if self.controls.saving_fails.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save(nodes).await
    }
}

/// Appends `|<step>` to every value, recording each call
struct Recorder {
    step: String,
    controls: Arc<Controls>,
    interrupt: InterruptFlag,
}

impl SyncTransform for Recorder {
    fn transform(&self, node: &Node) -> Result<Vec<Node>, TransformError> {
        self.controls.calls.lock().unwrap().push(Call {
            step: self.step.clone(),
            node_id: node.id,
            value: node.value.clone(),
        });

        if self
            .controls
            .fail_on
            .lock()
            .unwrap()
            .iter()
            .any(|marker| node.value == *marker)
        {
            return Err(TransformError::Failed(format!("refusing {}", node.value)));
        }

        let mut trigger = self.controls.interrupt_on.lock().unwrap();
        if trigger.as_deref() == Some(node.value.as_str()) {
            trigger.take();
            self.interrupt.raise();
        }

        Ok(vec![node.derive(format!("{}|{}", node.value, self.step))])
    }
}

/// An engine over a store, fixed input values and scripted answers
pub struct Harness {
    pub engine: ExecutionEngine,
    pub output: MemoryOutput,
    pub confirmation: Arc<ScriptedConfirmation>,
    pub interrupt: InterruptFlag,
    values: Vec<String>,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
    controls: Arc<Controls>,
}

/// What survives of a harness once its engine and store are gone
pub struct Detached {
    values: Vec<String>,
    output: MemoryOutput,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
    controls: Arc<Controls>,
}

impl Detached {
    /// A fresh engine over `backend` that keeps recording into the same calls,
    /// events and output
    pub fn attach(self, backend: Arc<dyn PersistenceBackend>) -> Harness {
        Harness::assemble(
            self.values,
            Vec::<String>::new(),
            backend,
            self.output,
            self.events,
            self.controls,
        )
    }
}

impl Harness {
    pub fn new(values: &[&str]) -> Self {
        Self::with_answers(values, Vec::<String>::new())
    }

    pub fn with_answers<S: Into<String>>(values: &[&str], answers: Vec<S>) -> Self {
        Self::assemble(
            owned(values),
            answers,
            Arc::new(InMemoryStore::new()),
            MemoryOutput::new(),
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Controls::default()),
        )
    }

    pub fn with_backend(values: &[&str], backend: Arc<dyn PersistenceBackend>) -> Self {
        Self::assemble(
            owned(values),
            Vec::<String>::new(),
            backend,
            MemoryOutput::new(),
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Controls::default()),
        )
    }

    /// Drop the engine, and with it the last handle on its store
    pub fn detach(self) -> Detached {
        let Harness {
            engine,
            output,
            values,
            events,
            controls,
            ..
        } = self;
        drop(engine);
        Detached {
            values,
            output,
            events,
            controls,
        }
    }

    fn assemble<S: Into<String>>(
        values: Vec<String>,
        answers: Vec<S>,
        backend: Arc<dyn PersistenceBackend>,
        output: MemoryOutput,
        events: Arc<Mutex<Vec<ExecutionEvent>>>,
        controls: Arc<Controls>,
    ) -> Self {
        let interrupt = InterruptFlag::new();

        let mut registry = ExecutorRegistry::with_builtins();
        let shared = controls.clone();
        let flag = interrupt.clone();
        registry.register("test", "append", move |config| {
            Ok(Transform::sync(Recorder {
                step: config.name(),
                controls: shared.clone(),
                interrupt: flag.clone(),
            }))
        });

        let datasets = FixedDatasets::new(
            Arc::new(MemoryInput::from_values(values.as_slice())),
            Arc::new(FlakyOutput {
                inner: output.clone(),
                controls: controls.clone(),
            }),
        );
        let confirmation = Arc::new(ScriptedConfirmation::new(answers));

        let mut engine = ExecutionEngine::new(backend, registry)
            .with_datasets(Arc::new(datasets))
            .with_confirmation(confirmation.clone())
            .with_interrupt_flag(interrupt.clone());

        let seen = events.clone();
        engine.add_event_handler(move |event| seen.lock().unwrap().push(event));

        Self {
            engine,
            output,
            confirmation,
            interrupt,
            values,
            events,
            controls,
        }
    }

    /// Make the recording transformation fail on exactly this value
    pub fn fail_on(&self, value: &str) {
        self.controls.fail_on.lock().unwrap().push(value.to_string());
    }

    pub fn clear_failures(&self) {
        self.controls.fail_on.lock().unwrap().clear();
    }

    /// Make saving the final output fail until called with `false`
    pub fn fail_saving(&self, fail: bool) {
        self.controls.saving_fails.store(fail, Ordering::SeqCst);
    }

    /// Raise the interrupt flag once, while this value is transformed
    pub fn interrupt_on(&self, value: &str) {
        *self.controls.interrupt_on.lock().unwrap() = Some(value.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.controls.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, step: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.step == step).collect()
    }

    /// How often `step` was handed a node with this value
    pub fn call_count(&self, step: &str, value: &str) -> usize {
        self.calls_for(step)
            .iter()
            .filter(|c| c.value == value)
            .count()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Run ids in the order their runs were created
    pub fn started_runs(&self) -> Vec<RunId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::RunStarted { run_id, .. } => Some(run_id),
                _ => None,
            })
            .collect()
    }

    pub async fn run_status(&self, run_id: RunId) -> RunStatus {
        self.engine.ledger().load_run(run_id).await.unwrap().status
    }

    pub async fn steps(&self, run_id: RunId) -> Vec<Step> {
        self.engine.ledger().steps(run_id).await.unwrap()
    }

    pub async fn step_statuses(&self, run_id: RunId) -> Vec<StepStatus> {
        self.steps(run_id).await.iter().map(|s| s.status).collect()
    }

    pub async fn step_named(&self, run_id: RunId, name: &str) -> Step {
        self.steps(run_id)
            .await
            .into_iter()
            .find(|s| s.name() == name)
            .unwrap_or_else(|| panic!("no step named {}", name))
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Pipeline of recording steps with the given names
pub fn recording_pipeline(names: &[&str]) -> PipelineConfig {
    pipeline(
        names
            .iter()
            .map(|name| StepConfig::new("test", "append").with_name(*name))
            .collect(),
    )
}

pub fn pipeline(steps: Vec<StepConfig>) -> PipelineConfig {
    PipelineConfig {
        input: InputConfig::Inline { values: vec![] },
        pipeline: steps,
        output: OutputConfig::Jsonl {
            path: "unused.jsonl".to_string(),
        },
    }
}

pub fn ablate_matching(name: &str, pattern: &str) -> StepConfig {
    StepConfig::new("ablation", "regex")
        .with_name(name)
        .with_parameter("pattern", json!(pattern))
}

pub fn sorted_values(nodes: &[Node]) -> Vec<String> {
    let mut values: Vec<String> = nodes.iter().map(|n| n.value.clone()).collect();
    values.sort();
    values
}

/// Final values of an uninterrupted run of `names` over `values`
pub async fn baseline(values: &[&str], names: &[&str]) -> Vec<String> {
    let harness = Harness::new(values);
    let outcome = harness
        .engine
        .execute(&recording_pipeline(names), None)
        .await
        .unwrap();
    match outcome {
        nodeline::RunOutcome::Finished { nodes, .. } => sorted_values(&nodes),
        other => panic!("baseline run did not finish: {:?}", other),
    }
}
