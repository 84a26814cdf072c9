//! Main execution engine - drives a run through its steps
//!
//! A run goes INITIALIZING -> EXECUTING(step i) -> FINALIZING -> FINISHED,
//! or ends ERRORED or STOPPED. Fresh runs, retries and resumes share the
//! same step loop; retry and resume first rebuild their starting point from
//! the ledger.

use crate::{
    core::{
        Node, NodeStatus, PipelineConfig, PipelineError, Result, Run, RunId, RunStatus, Settings,
        Step, StepStatus,
    },
    dataset::{Datasets, FileDatasets},
    execution::{
        cache::{CacheKey, StepCache},
        interrupt::{Confirmation, ConsoleConfirmation, InterruptFlag},
        registry::ExecutorRegistry,
    },
    persistence::{Ledger, PersistenceBackend},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        steps: usize,
    },
    InputLoaded {
        run_id: RunId,
        nodes: usize,
    },
    RunResumed {
        run_id: RunId,
        step: String,
        position: usize,
    },
    StepStarted {
        step: String,
        position: usize,
        total: usize,
        pending: usize,
        processed: usize,
    },
    CacheHit {
        step: String,
    },
    StepCompleted {
        step: String,
        outputs: usize,
    },
    StepFailed {
        step: String,
        error: String,
    },
    RunFinished {
        run_id: RunId,
        outputs: usize,
    },
    RunStopped {
        run_id: RunId,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// How a run ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every step completed and the output was saved
    Finished { run_id: RunId, nodes: Vec<Node> },
    /// The user confirmed a stop; the run can be resumed later
    Stopped { run_id: RunId },
}

impl RunOutcome {
    pub fn run_id(&self) -> RunId {
        match self {
            RunOutcome::Finished { run_id, .. } | RunOutcome::Stopped { run_id } => *run_id,
        }
    }
}

type BoxedRun<'a> = Pin<Box<dyn Future<Output = Result<RunOutcome>> + Send + 'a>>;

/// Pipeline orchestrator
pub struct ExecutionEngine {
    ledger: Ledger,
    registry: ExecutorRegistry,
    datasets: Arc<dyn Datasets>,
    cache: StepCache,
    confirmation: Arc<dyn Confirmation>,
    interrupt: InterruptFlag,
    settings: Settings,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(backend: Arc<dyn PersistenceBackend>, registry: ExecutorRegistry) -> Self {
        let settings = Settings::default();
        Self {
            ledger: Ledger::new(backend),
            registry,
            datasets: Arc::new(FileDatasets),
            cache: StepCache::new(settings.enable_cache),
            confirmation: Arc::new(ConsoleConfirmation::new()),
            interrupt: InterruptFlag::new(),
            settings,
            event_handlers: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.cache = StepCache::new(settings.enable_cache);
        self.settings = settings;
        self
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn Datasets>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_interrupt_flag(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Flag to raise from a signal handler to request a stop
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Create a run for `config` and execute it from the first step
    pub async fn execute(
        &self,
        config: &PipelineConfig,
        batch_size: Option<usize>,
    ) -> Result<RunOutcome> {
        let mut active = None;
        let result = self.start_run(config, batch_size, &mut active).await;
        let result = self.persist_on_error(active, result).await;
        self.confirm_on_interrupt(result, batch_size).await
    }

    /// Restart from the most recently errored step of any run
    pub async fn retry(&self, batch_size: Option<usize>) -> Result<RunOutcome> {
        let step = self.ledger.last_failed_step().await?;
        info!("Retrying run {} from {}", step.run_id, step.name());

        let mut active = None;
        let result = self.restart(&step, batch_size, &mut active).await;
        let result = self.persist_on_error(active, result).await;
        self.confirm_on_interrupt(result, batch_size).await
    }

    /// Continue `run_id` from its first step that was not processed
    pub fn resume(&self, run_id: RunId, batch_size: Option<usize>) -> BoxedRun<'_> {
        Box::pin(async move {
            let step = self.ledger.step_to_resume(run_id).await?;
            info!("Resuming run {} from {}", run_id, step.name());

            let mut active = None;
            let result = self.restart(&step, batch_size, &mut active).await;
            let result = self.persist_on_error(active, result).await;
            self.confirm_on_interrupt(result, batch_size).await
        })
    }

    /// Record any failure of a run that exists as ERRORED, then pass it on
    async fn persist_on_error(
        &self,
        active: Option<RunId>,
        result: Result<RunOutcome>,
    ) -> Result<RunOutcome> {
        let err = match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        let Some(run_id) = active else {
            return Err(err);
        };
        if matches!(err, PipelineError::Interrupted(_)) {
            return Err(err);
        }

        match self.ledger.load_run(run_id).await {
            Ok(mut run) if run.status != RunStatus::Finished => {
                match self.ledger.update(&mut run, RunStatus::Errored).await {
                    Ok(()) => error!("Run {} errored: {}", run_id, err),
                    Err(e) => error!("Failed to mark run {} as errored: {}", run_id, e),
                }
            }
            Ok(_) => {}
            Err(e) => error!("Failed to load run {}: {}", run_id, e),
        }
        Err(err)
    }

    /// Turn an interruption into a stop or a transparent resume
    async fn confirm_on_interrupt(
        &self,
        result: Result<RunOutcome>,
        batch_size: Option<usize>,
    ) -> Result<RunOutcome> {
        let run_id = match result {
            Err(PipelineError::Interrupted(run_id)) => run_id,
            other => return other,
        };

        warn!("Run {} interrupted", run_id);
        if self
            .confirmation
            .confirm(&format!("Stop run {}? Answer 'y' to stop, anything else resumes.", run_id))
        {
            let mut run = self.ledger.load_run(run_id).await?;
            self.ledger.update(&mut run, RunStatus::Stopped).await?;
            info!("Run {} stopped", run_id);
            self.emit(ExecutionEvent::RunStopped { run_id });
            Ok(RunOutcome::Stopped { run_id })
        } else {
            info!("Continuing run {}", run_id);
            self.resume(run_id, batch_size).await
        }
    }

    async fn start_run(
        &self,
        config: &PipelineConfig,
        batch_size: Option<usize>,
        active: &mut Option<RunId>,
    ) -> Result<RunOutcome> {
        self.registry.validate(config)?;

        let (mut run, steps) = self.ledger.create_with_steps(config).await?;
        *active = Some(run.id);
        info!("Starting run {} ({} steps)", run.id, steps.len());
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.id,
            steps: steps.len(),
        });

        let first = steps
            .first()
            .ok_or_else(|| PipelineError::InvalidConfig("Pipeline has no steps".to_string()))?;
        let nodes = self.load_input(&run, first).await?;
        self.run_steps(&mut run, steps, nodes, false, batch_size)
            .await
    }

    async fn restart(
        &self,
        step: &Step,
        batch_size: Option<usize>,
        active: &mut Option<RunId>,
    ) -> Result<RunOutcome> {
        let point = self.ledger.restart_from_step(step).await?;
        let mut run = point.run;

        // A stored config that no longer resolves leaves the run untouched
        self.registry.validate(&run.pipeline_config()?)?;
        *active = Some(run.id);

        if run.status != RunStatus::Running {
            self.ledger.update(&mut run, RunStatus::Running).await?;
        }

        let Some(first) = point.remaining_steps.first() else {
            info!("Every step of run {} is processed, saving its output", run.id);
            self.emit(ExecutionEvent::RunResumed {
                run_id: run.id,
                step: step.name(),
                position: step.position,
            });
            return self.finalize(&mut run, point.input_nodes).await;
        };
        self.emit(ExecutionEvent::RunResumed {
            run_id: run.id,
            step: first.name(),
            position: first.position,
        });

        // Steps that were entered have their inputs recorded already
        let restarted = first.status != StepStatus::Pending;
        let nodes = if point.reload_input {
            self.load_input(&run, first).await?
        } else {
            point.input_nodes
        };

        self.run_steps(&mut run, point.remaining_steps, nodes, restarted, batch_size)
            .await
    }

    async fn load_input(&self, run: &Run, first: &Step) -> Result<Vec<Node>> {
        let config = run.pipeline_config()?;
        let nodes = self
            .datasets
            .loader(&config.input)
            .load()
            .await
            .map_err(PipelineError::Input)?;
        self.ledger.attach_inputs(first, &nodes).await?;

        self.emit(ExecutionEvent::InputLoaded {
            run_id: run.id,
            nodes: nodes.len(),
        });
        Ok(nodes)
    }

    async fn run_steps(
        &self,
        run: &mut Run,
        steps: Vec<Step>,
        mut nodes: Vec<Node>,
        first_restarted: bool,
        batch_size: Option<usize>,
    ) -> Result<RunOutcome> {
        let total = steps.last().map(|s| s.position + 1).unwrap_or_default();
        for (i, step) in steps.into_iter().enumerate() {
            self.check_interrupt(run.id)?;
            let restarted = i == 0 && first_restarted;
            nodes = self
                .run_step(step, nodes, restarted, total, batch_size)
                .await?;
            self.check_interrupt(run.id)?;
        }
        self.finalize(run, nodes).await
    }

    fn check_interrupt(&self, run_id: RunId) -> Result<()> {
        if self.interrupt.take() {
            return Err(PipelineError::Interrupted(run_id));
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: Step,
        nodes: Vec<Node>,
        restarted: bool,
        total: usize,
        batch_size: Option<usize>,
    ) -> Result<Vec<Node>> {
        if self.settings.debug {
            info!("{}", step);
        }

        let name = step.name();
        let position = step.position;
        let mut executor = self
            .registry
            .build(step, self.ledger.backend().clone())?;

        // Only a restarted step can hold work from an earlier attempt
        let (pending, processed): (Vec<Node>, Vec<Node>) = if restarted {
            nodes
                .into_iter()
                .partition(|n| n.status != NodeStatus::Processed)
        } else {
            (nodes, Vec::new())
        };

        self.emit(ExecutionEvent::StepStarted {
            step: name.clone(),
            position,
            total,
            pending: pending.len(),
            processed: processed.len(),
        });

        // A restarted step holds partial progress of an earlier attempt, so
        // its result is never taken from or stored in the cache
        let key = (!restarted).then(|| CacheKey::new(executor.step(), &pending));
        if let Some(key) = &key {
            if let Some(cached) = self.cache.get(key).await {
                self.emit(ExecutionEvent::CacheHit { step: name.clone() });
                let outputs = executor.replay(&pending, cached).await?;
                self.emit(ExecutionEvent::StepCompleted {
                    step: name,
                    outputs: outputs.len(),
                });
                return Ok(outputs);
            }
        }

        match executor
            .execute_and_update_step(pending, processed, restarted, batch_size)
            .await
        {
            Ok(outputs) => {
                if let Some(key) = key {
                    self.cache.put(key, outputs.clone()).await;
                }
                self.emit(ExecutionEvent::StepCompleted {
                    step: name,
                    outputs: outputs.len(),
                });
                Ok(outputs)
            }
            Err(e) => {
                self.emit(ExecutionEvent::StepFailed {
                    step: name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn finalize(&self, run: &mut Run, nodes: Vec<Node>) -> Result<RunOutcome> {
        let config = run.pipeline_config()?;
        self.datasets
            .saver(&config.output)
            .save(&nodes)
            .await
            .map_err(PipelineError::Output)?;

        if self.interrupt.take() {
            return Err(PipelineError::InterruptedDuringFinalization(run.id));
        }

        self.ledger.update(run, RunStatus::Finished).await?;
        info!("Run {} finished with {} nodes", run.id, nodes.len());
        self.emit(ExecutionEvent::RunFinished {
            run_id: run.id,
            outputs: nodes.len(),
        });
        Ok(RunOutcome::Finished {
            run_id: run.id,
            nodes,
        })
    }
}
