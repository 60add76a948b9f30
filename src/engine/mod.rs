// src/engine/mod.rs

//! Process supervision engine.
//!
//! This module ties together:
//! - [`task`]: one supervised process (`ProcessTask`) and its tick logic
//! - [`chain`]: strictly sequential multi-step runs (`ProcessChain`)
//! - [`registry`]: the shared set of live tasks (`TaskRegistry`)
//!
//! [`Supervisor`] bundles the three collaborators every task needs (a
//! scheduler for ticks, a launcher for processes, and the registry) so callers
//! inject them once instead of relying on global state.

pub mod chain;
pub mod registry;
pub mod task;

use std::fmt;
use std::rc::Rc;

use crate::errors::Result;
use crate::exec::{Launcher, SystemLauncher};
use crate::schedule::{Scheduler, TokioScheduler};
use crate::types::CaptureMode;

pub use chain::{
    ChainBuilder, ChainCommand, ChainPhase, ChainProgress, ChainStep, ProcessChain,
};
pub use registry::{TagFilter, TaskRegistry};
pub use task::{
    Completion, DEFAULT_POLL_FREQUENCY, ProcessTask, TaskCallbacks, TaskId, TaskSpec, TaskState,
};

/// Entry point for starting tasks and chains.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Supervisor {
    scheduler: Rc<dyn Scheduler>,
    launcher: Rc<dyn Launcher>,
    registry: TaskRegistry,
}

impl Supervisor {
    pub fn new(scheduler: Rc<dyn Scheduler>, launcher: Rc<dyn Launcher>) -> Self {
        Self::with_registry(scheduler, launcher, TaskRegistry::new())
    }

    pub fn with_registry(
        scheduler: Rc<dyn Scheduler>,
        launcher: Rc<dyn Launcher>,
        registry: TaskRegistry,
    ) -> Self {
        Self {
            scheduler,
            launcher,
            registry,
        }
    }

    /// Real processes polled by Tokio timers. Must be used inside a
    /// `tokio::task::LocalSet`.
    pub fn tokio(capture: CaptureMode) -> Self {
        Self::new(
            Rc::new(TokioScheduler::new()),
            Rc::new(SystemLauncher::new(capture)),
        )
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Spawn and start supervising a process.
    ///
    /// Returns an error only if `spec` is invalid or the process cannot be
    /// spawned; in that case nothing is registered and no callback fires.
    pub fn spawn(&self, spec: TaskSpec, callbacks: TaskCallbacks) -> Result<ProcessTask> {
        ProcessTask::start(
            spec,
            callbacks,
            self.scheduler.as_ref(),
            self.launcher.as_ref(),
            &self.registry,
        )
    }

    /// Begin configuring a chain whose steps run through this supervisor.
    pub fn chain(&self) -> ChainBuilder {
        ChainBuilder::new(self.clone())
    }

    /// Kill every live task.
    pub fn kill_all(&self) -> usize {
        self.registry.kill_all()
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("live_tasks", &self.registry.len())
            .finish_non_exhaustive()
    }
}
