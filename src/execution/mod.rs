//! Pipeline execution: step executors, the result cache and the orchestrator

pub mod cache;
pub mod engine;
pub mod executor;
pub mod interrupt;
pub mod registry;
pub mod transforms;

pub use cache::{CacheKey, StepCache};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunOutcome};
pub use executor::{
    AsyncTransform, ErrorPolicy, ExecutionOptions, StepExecutor, SyncTransform, Transform,
};
pub use interrupt::{Confirmation, ConsoleConfirmation, InterruptFlag, ScriptedConfirmation};
pub use registry::{ExecutorRegistry, TransformFactory};
