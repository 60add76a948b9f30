// src/engine/chain.rs

//! Sequential process chains.
//!
//! A [`ProcessChain`] runs its steps one at a time, each as its own
//! [`ProcessTask`]. The next step is spawned from inside the previous task's
//! completion callback, after that task's schedule has been stopped, so two
//! steps never overlap. The first step that fails, times out or is killed
//! finishes the chain with `false`; the remaining steps never start.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::errors::{Result, RunwatchError};
use crate::exec::display_command;
use crate::types::{Metadata, TagValue};

use super::Supervisor;
use super::task::{
    Completion, DEFAULT_POLL_FREQUENCY, ProcessTask, TaskCallbacks, TaskSpec, panic_message,
    validate_poll_frequency,
};

/// Chain-level progress: which step is running and for how long.
pub type ChainProgressFn = Box<dyn FnMut(ChainProgress<'_>)>;
/// Chain completion: `true` only if every step succeeded.
pub type ChainCompletionFn = Box<dyn FnOnce(bool)>;

/// One step to append to a chain.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub command: Vec<String>,
    pub name: Option<String>,
    pub timeout_secs: u64,
    pub poll_frequency: f64,
}

impl ChainStep {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            name: None,
            timeout_secs: 0,
            poll_frequency: DEFAULT_POLL_FREQUENCY,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn poll_frequency(mut self, hz: f64) -> Self {
        self.poll_frequency = hz;
        self
    }
}

/// A step as recorded by the chain, including how it went.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCommand {
    pub index: usize,
    pub name: Option<String>,
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub poll_frequency: f64,
    pub started: bool,
    pub return_code: Option<i32>,
    pub success: Option<bool>,
}

impl ChainCommand {
    /// The step's name, or `step N` (1-based) if it has none.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("step {}", self.index + 1))
    }
}

/// Progress of the active step.
#[derive(Debug, Clone, Copy)]
pub struct ChainProgress<'a> {
    pub command: &'a ChainCommand,
    /// Tick-counted seconds of the active step only.
    pub elapsed: f64,
    /// Output produced by the active step since the previous update.
    pub output: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPhase {
    /// Steps may still be added.
    Building,
    Running,
    /// Inert; no further tasks will be created.
    Finished,
}

/// Configures and creates a [`ProcessChain`].
pub struct ChainBuilder {
    supervisor: Supervisor,
    env: Option<HashMap<String, String>>,
    metadata: Metadata,
    on_progress: Option<ChainProgressFn>,
    on_completion: Option<ChainCompletionFn>,
}

impl ChainBuilder {
    pub(crate) fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            env: None,
            metadata: Metadata::new(),
            on_progress: None,
            on_completion: None,
        }
    }

    /// Environment for every step.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Tag attached to every step's task.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(ChainProgress<'_>) + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_completion(mut self, f: impl FnOnce(bool) + 'static) -> Self {
        self.on_completion = Some(Box::new(f));
        self
    }

    pub fn build(self) -> ProcessChain {
        ProcessChain {
            inner: Rc::new(ChainInner {
                supervisor: self.supervisor,
                env: self.env,
                metadata: self.metadata,
                commands: RefCell::new(Vec::new()),
                phase: Cell::new(ChainPhase::Building),
                current: Cell::new(-1),
                success: Cell::new(true),
                active: RefCell::new(None),
                on_progress: RefCell::new(self.on_progress),
                on_completion: RefCell::new(self.on_completion),
            }),
        }
    }
}

struct ChainInner {
    supervisor: Supervisor,
    env: Option<HashMap<String, String>>,
    metadata: Metadata,
    commands: RefCell<Vec<ChainCommand>>,
    phase: Cell<ChainPhase>,
    current: Cell<isize>,
    success: Cell<bool>,
    active: RefCell<Option<ProcessTask>>,
    on_progress: RefCell<Option<ChainProgressFn>>,
    on_completion: RefCell<Option<ChainCompletionFn>>,
}

/// Handle to a chain. Clones share state.
///
/// The active step's callbacks hold a clone, so a running chain stays alive
/// even if the caller drops its handle.
#[derive(Clone)]
pub struct ProcessChain {
    inner: Rc<ChainInner>,
}

impl ProcessChain {
    /// Append a step. Fails once the chain has started.
    pub fn add(&self, step: ChainStep) -> Result<()> {
        if self.inner.phase.get() != ChainPhase::Building {
            return Err(RunwatchError::ChainAlreadyStarted);
        }
        if step.command.is_empty() {
            return Err(RunwatchError::InvalidCommand(
                "chain step must contain at least a program".to_string(),
            ));
        }
        validate_poll_frequency(step.poll_frequency)?;

        let mut commands = self.inner.commands.borrow_mut();
        let index = commands.len();
        commands.push(ChainCommand {
            index,
            name: step.name,
            command: step.command,
            timeout_secs: step.timeout_secs,
            poll_frequency: step.poll_frequency,
            started: false,
            return_code: None,
            success: None,
        });
        Ok(())
    }

    /// Start the first step.
    ///
    /// A chain without steps completes with `true` immediately. If the first
    /// step cannot be spawned the error is returned, the chain is finished as
    /// failed, and the completion callback is not invoked.
    pub fn start(&self) -> Result<()> {
        if self.inner.phase.get() != ChainPhase::Building {
            return Err(RunwatchError::ChainAlreadyStarted);
        }
        self.inner.phase.set(ChainPhase::Running);
        info!(steps = self.len(), "starting process chain");

        if let Err(e) = self.start_next() {
            self.inner.success.set(false);
            self.inner.phase.set(ChainPhase::Finished);
            drop(self.inner.on_progress.borrow_mut().take());
            drop(self.inner.on_completion.borrow_mut().take());
            return Err(e);
        }
        Ok(())
    }

    /// Kill the active step, which finishes the chain with `false`.
    ///
    /// Returns `false` if no step was running.
    pub fn cancel(&self) -> bool {
        let active = self.inner.active.borrow().clone();
        match active {
            Some(task) if self.inner.phase.get() == ChainPhase::Running => {
                info!(task_id = %task.id(), "cancelling process chain");
                task.kill();
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> ChainPhase {
        self.inner.phase.get()
    }

    /// Index of the active step: -1 before start, `len()` after full success.
    pub fn current_index(&self) -> isize {
        self.inner.current.get()
    }

    /// False as soon as any step failed.
    pub fn success(&self) -> bool {
        self.inner.success.get()
    }

    pub fn len(&self) -> usize {
        self.inner.commands.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.commands.borrow().is_empty()
    }

    /// Snapshot of all steps with their recorded results.
    pub fn commands(&self) -> Vec<ChainCommand> {
        self.inner.commands.borrow().clone()
    }

    pub fn active_task(&self) -> Option<ProcessTask> {
        self.inner.active.borrow().clone()
    }

    fn start_next(&self) -> Result<()> {
        let next = self.inner.current.get() + 1;
        let total = self.len();

        if (next as usize) < total {
            self.inner.current.set(next);
            self.launch(next as usize)
        } else {
            self.inner.current.set(total as isize);
            self.finish(true);
            Ok(())
        }
    }

    fn launch(&self, index: usize) -> Result<()> {
        let step = {
            let mut commands = self.inner.commands.borrow_mut();
            commands[index].started = true;
            commands[index].clone()
        };

        info!(
            step = index,
            name = %step.label(),
            cmd = %display_command(&step.command),
            "starting chain step"
        );

        let mut spec = TaskSpec::new(step.command)
            .poll_frequency(step.poll_frequency)
            .timeout_secs(step.timeout_secs)
            .metadata(self.inner.metadata.clone());
        if let Some(env) = &self.inner.env {
            spec = spec.env(env.clone());
        }

        let on_progress = self.clone();
        let on_completion = self.clone();
        let callbacks = TaskCallbacks::new()
            .on_progress(move |elapsed, output| on_progress.step_progressed(index, elapsed, output))
            .on_completion(move |completion| on_completion.step_completed(index, completion));

        let task = self.inner.supervisor.spawn(spec, callbacks)?;
        *self.inner.active.borrow_mut() = Some(task);
        Ok(())
    }

    fn step_progressed(&self, index: usize, elapsed: f64, output: &str) {
        if self.inner.phase.get() != ChainPhase::Running {
            return;
        }
        let command = self.inner.commands.borrow()[index].clone();

        let callback = self.inner.on_progress.borrow_mut().take();
        if let Some(mut callback) = callback {
            let call = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(ChainProgress {
                    command: &command,
                    elapsed,
                    output,
                })
            }));
            if let Err(payload) = call {
                error!(
                    step = index + 1,
                    cmd = %display_command(&command.command),
                    panic = %panic_message(payload.as_ref()),
                    "chain progress callback panicked"
                );
            }
            // Kept across a panic so later ticks and steps still report.
            if self.inner.phase.get() == ChainPhase::Running {
                *self.inner.on_progress.borrow_mut() = Some(callback);
            }
        }
    }

    fn step_completed(&self, index: usize, completion: Completion) {
        drop(self.inner.active.borrow_mut().take());
        {
            let mut commands = self.inner.commands.borrow_mut();
            commands[index].return_code = Some(completion.return_code);
            commands[index].success = Some(completion.success());
        }

        if self.inner.phase.get() != ChainPhase::Running {
            debug!(step = index, "chain no longer running; ignoring step completion");
            return;
        }

        if completion.success() {
            debug!(step = index, "chain step succeeded");
            if let Err(e) = self.start_next() {
                error!(step = index + 1, error = %e, "could not start next chain step");
                self.finish(false);
            }
        } else {
            warn!(
                step = index,
                exit_code = completion.return_code,
                timed_out = completion.timed_out,
                killed = completion.killed,
                "chain step failed; skipping remaining steps"
            );
            self.finish(false);
        }
    }

    fn finish(&self, success: bool) {
        if self.inner.phase.get() == ChainPhase::Finished {
            return;
        }
        self.inner.success.set(self.inner.success.get() && success);
        self.inner.phase.set(ChainPhase::Finished);
        drop(self.inner.on_progress.borrow_mut().take());

        let overall = self.inner.success.get();
        info!(success = overall, "process chain finished");

        let callback = self.inner.on_completion.borrow_mut().take();
        if let Some(callback) = callback {
            callback(overall);
        }
    }
}

impl fmt::Debug for ProcessChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessChain")
            .field("phase", &self.inner.phase.get())
            .field("current", &self.inner.current.get())
            .field("success", &self.inner.success.get())
            .field("commands", &self.inner.commands.borrow())
            .finish_non_exhaustive()
    }
}
