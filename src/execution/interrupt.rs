//! User interruption: a shared flag and the stop confirmation gate

use console::Term;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

/// Set when the user asks to stop (Ctrl-C). Checked between steps.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Prompt-and-read collaborator for the stop confirmation
pub trait Confirmation: Send + Sync {
    /// Ask the user; true only for an explicit "y"
    fn confirm(&self, prompt: &str) -> bool;
}

/// Reads the answer from the terminal
#[derive(Debug, Clone)]
pub struct ConsoleConfirmation {
    term: Term,
}

impl ConsoleConfirmation {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl Default for ConsoleConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

impl Confirmation for ConsoleConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        if let Err(e) = self.term.write_str(&format!("{} [y/N] ", prompt)) {
            warn!("Failed to write confirmation prompt: {}", e);
        }
        match blocking(|| self.term.read_line()) {
            Ok(answer) => is_yes(&answer),
            Err(e) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
        }
    }
}

/// Answers from a fixed script, then "n" once the script runs out
#[derive(Debug, Default)]
pub struct ScriptedConfirmation {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

impl Confirmation for ScriptedConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(prompt.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .is_some_and(|answer| is_yes(&answer))
    }
}

/// Run a blocking call without stalling the other tasks of a multi-threaded
/// runtime. Outside of one the call simply runs in place.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}
