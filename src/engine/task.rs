// src/engine/task.rs

//! Supervision of a single external process.
//!
//! A [`ProcessTask`] owns one OS process and its output sink from spawn until
//! its terminal transition. Each scheduler tick calls [`ProcessTask::poll`],
//! which (in this order) advances the tick-counted clock, enforces the
//! timeout, detects a natural exit, or streams new output to the progress
//! callback. [`ProcessTask::kill`] may be called at any time between ticks.
//!
//! An exit whose output sink has not drained yet (a background grandchild
//! still holding the pipe) is held for up to [`DRAIN_GRACE`] of ticks while
//! output keeps streaming; the timeout no longer applies once an exit is seen.
//!
//! The `disabled` flag is the single source of truth for "still active":
//! whichever terminal path sets it first wins and every later poll or kill is
//! a no-op. The terminal transition releases the process and the sink exactly
//! once, fires the completion callback exactly once, and deregisters the task.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::{Result, RunwatchError};
use crate::exec::{
    LaunchRequest, Launcher, OutputSink, ProcessHandle, Utf8Decoder, display_command,
};
use crate::schedule::{ScheduleHandle, Scheduler, interval_for_frequency, try_interval_for_frequency};
use crate::types::{Metadata, TagValue, format_metadata};

use super::registry::{TaskRegistry, WeakRegistry};

/// Default poll frequency in Hz (one tick every 500 ms).
pub const DEFAULT_POLL_FREQUENCY: f64 = 2.0;

/// How long, in tick-counted time, a natural exit waits for the output sink
/// to drain. Always at least one tick.
pub const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Progress callback: `(elapsed_seconds, new_output)`.
pub type ProgressFn = Box<dyn FnMut(f64, &str)>;
/// Completion callback, consumed by the single terminal transition.
pub type CompletionFn = Box<dyn FnOnce(Completion)>;

/// Registry-unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task. Everything but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Killed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

/// Payload of the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Exit code, or `-1` for timeouts, kills and signal deaths.
    pub return_code: i32,
    /// Everything the process wrote to stdout and stderr, unsanitized.
    pub output: String,
    pub timed_out: bool,
    pub killed: bool,
}

impl Completion {
    /// Exited on its own with code 0.
    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out && !self.killed
    }
}

/// What to run and how to supervise it.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub command: Vec<String>,
    /// Ticks per second.
    pub poll_frequency: f64,
    /// Seconds of tick-counted time before the process is killed; 0 disables.
    pub timeout_secs: u64,
    pub metadata: Metadata,
    /// Complete child environment; `None` inherits the supervisor's.
    pub env: Option<HashMap<String, String>>,
}

impl TaskSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            poll_frequency: DEFAULT_POLL_FREQUENCY,
            timeout_secs: 0,
            metadata: Metadata::new(),
            env: None,
        }
    }

    pub fn poll_frequency(mut self, hz: f64) -> Self {
        self.poll_frequency = hz;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(RunwatchError::InvalidCommand(
                "command must contain at least a program".to_string(),
            ));
        }
        validate_poll_frequency(self.poll_frequency)
    }
}

fn drain_grace_ticks(poll_frequency: f64) -> u64 {
    (DRAIN_GRACE.as_secs_f64() * poll_frequency).ceil().max(1.0) as u64
}

pub(crate) fn validate_poll_frequency(hz: f64) -> Result<()> {
    match try_interval_for_frequency(hz) {
        Some(_) => Ok(()),
        None => Err(RunwatchError::InvalidPollFrequency(hz)),
    }
}

/// Callbacks supplied once, at construction.
#[derive(Default)]
pub struct TaskCallbacks {
    on_progress: Option<ProgressFn>,
    on_completion: Option<CompletionFn>,
}

impl TaskCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(f64, &str) + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_completion(mut self, f: impl FnOnce(Completion) + 'static) -> Self {
        self.on_completion = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Exited(i32),
    TimedOut,
    Killed,
}

struct TaskIo {
    process: Box<dyn ProcessHandle>,
    output: Box<dyn OutputSink>,
    decoder: Utf8Decoder,
}

struct TaskInner {
    id: TaskId,
    command: Vec<String>,
    metadata: Metadata,
    poll_frequency: f64,
    timeout_secs: u64,
    pid: Option<u32>,

    ticks: Cell<u64>,
    cursor: Cell<u64>,
    /// Exit code seen while the sink was still draining.
    exited: Cell<Option<i32>>,
    drain_ticks: Cell<u64>,
    state: Cell<TaskState>,
    disabled: Cell<bool>,

    io: RefCell<Option<TaskIo>>,
    schedule: RefCell<Option<ScheduleHandle>>,
    on_progress: RefCell<Option<ProgressFn>>,
    on_completion: RefCell<Option<CompletionFn>>,
    registry: WeakRegistry,
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        // Only reachable without a terminal transition if the registry itself
        // was dropped while the task was running.
        if let Some(schedule) = self.schedule.get_mut().take() {
            schedule.cancel();
        }
        if let Some(io) = self.io.get_mut().take() {
            warn!(task_id = %self.id, "task dropped while running; killing process");
            let TaskIo {
                mut process, output, ..
            } = io;
            if let Err(e) = process.kill() {
                warn!(task_id = %self.id, error = %e, "failed to kill process on drop");
            }
            if let Err(e) = output.release() {
                warn!(task_id = %self.id, error = %e, "failed to release output capture on drop");
            }
        }
    }
}

/// Handle to one supervised process. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ProcessTask {
    inner: Rc<TaskInner>,
}

impl ProcessTask {
    /// Spawn the process, register the task and start its poll schedule.
    ///
    /// Spawn failures are returned here and nothing is registered.
    pub(crate) fn start(
        spec: TaskSpec,
        callbacks: TaskCallbacks,
        scheduler: &dyn Scheduler,
        launcher: &dyn Launcher,
        registry: &TaskRegistry,
    ) -> Result<Self> {
        spec.validate()?;

        let spawned = launcher.launch(&LaunchRequest {
            command: &spec.command,
            env: spec.env.as_ref(),
        })?;
        let pid = spawned.process.id();

        let task = ProcessTask {
            inner: Rc::new(TaskInner {
                id: registry.next_id(),
                command: spec.command,
                metadata: spec.metadata,
                poll_frequency: spec.poll_frequency,
                timeout_secs: spec.timeout_secs,
                pid,
                ticks: Cell::new(0),
                cursor: Cell::new(0),
                exited: Cell::new(None),
                drain_ticks: Cell::new(0),
                state: Cell::new(TaskState::Running),
                disabled: Cell::new(false),
                io: RefCell::new(Some(TaskIo {
                    process: spawned.process,
                    output: spawned.output,
                    decoder: Utf8Decoder::new(),
                })),
                schedule: RefCell::new(None),
                on_progress: RefCell::new(callbacks.on_progress),
                on_completion: RefCell::new(callbacks.on_completion),
                registry: registry.downgrade(),
            }),
        };

        registry.insert(task.clone());

        let weak = Rc::downgrade(&task.inner);
        let handle = scheduler.schedule(
            interval_for_frequency(task.inner.poll_frequency),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    ProcessTask { inner }.poll();
                }
            }),
        );
        *task.inner.schedule.borrow_mut() = Some(handle);

        info!(
            task_id = %task.inner.id,
            pid = ?pid,
            cmd = %display_command(&task.inner.command),
            poll_frequency = task.inner.poll_frequency,
            timeout_secs = task.inner.timeout_secs,
            tags = %format_metadata(&task.inner.metadata),
            "task started"
        );

        Ok(task)
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn command(&self) -> &[String] {
        &self.inner.command
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn poll_frequency(&self) -> f64 {
        self.inner.poll_frequency
    }

    pub fn timeout_secs(&self) -> u64 {
        self.inner.timeout_secs
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Tick-counted seconds: polls so far divided by the poll frequency.
    pub fn elapsed(&self) -> f64 {
        self.inner.ticks.get() as f64 / self.inner.poll_frequency
    }

    pub fn state(&self) -> TaskState {
        self.inner.state.get()
    }

    /// True once a terminal path has started (mid-teardown or done).
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.get()
    }

    /// Bytes of output already handed to the progress callback.
    pub fn output_cursor(&self) -> u64 {
        self.inner.cursor.get()
    }

    /// One scheduler tick.
    pub fn poll(&self) {
        let inner = &*self.inner;
        if inner.disabled.get() {
            return;
        }

        inner.ticks.set(inner.ticks.get() + 1);
        let elapsed = self.elapsed();

        let exited = match inner.exited.get() {
            Some(code) => Some(code),
            None => {
                if inner.timeout_secs > 0 && elapsed > inner.timeout_secs as f64 {
                    info!(
                        task_id = %inner.id,
                        elapsed,
                        timeout_secs = inner.timeout_secs,
                        "task timed out; killing process"
                    );
                    self.terminate(Termination::TimedOut);
                    return;
                }
                self.exit_code()
            }
        };

        if let Some(code) = exited {
            if self.done_draining(code) {
                self.terminate(Termination::Exited(code));
                return;
            }
        }

        let chunk = self.read_new_output();
        self.emit_progress(elapsed, &chunk);
    }

    /// Cancel the task: completion reports `killed = true`, then the process
    /// is terminated and the task deregistered.
    ///
    /// Calling this on a task that already reached (or is reaching) its
    /// terminal state does nothing.
    pub fn kill(&self) {
        if self.inner.disabled.get() {
            debug!(task_id = %self.inner.id, "kill ignored; task already finishing");
            return;
        }
        info!(
            task_id = %self.inner.id,
            cmd = %display_command(&self.inner.command),
            "killing task"
        );
        self.terminate(Termination::Killed);
    }

    fn exit_code(&self) -> Option<i32> {
        let mut io = self.inner.io.borrow_mut();
        let io = io.as_mut()?;
        match io.process.try_wait() {
            Ok(code) => code,
            Err(e) => {
                warn!(task_id = %self.inner.id, error = %e, "failed to query process status");
                None
            }
        }
    }

    /// After an exit: true once the sink has drained or the grace ticks are
    /// used up. Until then the exit code is held and output keeps streaming.
    fn done_draining(&self, code: i32) -> bool {
        let inner = &*self.inner;
        let drained = inner
            .io
            .borrow()
            .as_ref()
            .is_none_or(|io| io.output.is_drained());
        if drained {
            return true;
        }

        if inner.exited.replace(Some(code)).is_none() {
            debug!(
                task_id = %inner.id,
                exit_code = code,
                "process exited; waiting for output to drain"
            );
        }
        let waited = inner.drain_ticks.get();
        if waited >= drain_grace_ticks(inner.poll_frequency) {
            warn!(
                task_id = %inner.id,
                "output still open after exit; finishing without the rest"
            );
            return true;
        }
        inner.drain_ticks.set(waited + 1);
        false
    }

    fn read_new_output(&self) -> String {
        let mut io = self.inner.io.borrow_mut();
        let Some(io) = io.as_mut() else {
            return String::new();
        };

        let cursor = self.inner.cursor.get();
        match io.output.read_from(cursor) {
            Ok(bytes) => {
                self.inner.cursor.set(cursor + bytes.len() as u64);
                io.decoder.decode(&bytes)
            }
            Err(e) => {
                warn!(task_id = %self.inner.id, error = %e, "failed to read captured output");
                String::new()
            }
        }
    }

    fn emit_progress(&self, elapsed: f64, chunk: &str) {
        // Taken out for the call so the callback may kill this task.
        let callback = self.inner.on_progress.borrow_mut().take();
        let Some(mut callback) = callback else {
            return;
        };

        let ok = guarded(self.inner.id, "progress", || callback(elapsed, chunk));
        if ok && !self.inner.disabled.get() {
            *self.inner.on_progress.borrow_mut() = Some(callback);
        }
    }

    fn terminate(&self, cause: Termination) {
        let inner = &*self.inner;
        inner.disabled.set(true);

        let schedule = inner.schedule.borrow_mut().take();
        if let Some(schedule) = schedule {
            schedule.cancel();
        }
        drop(inner.on_progress.borrow_mut().take());

        let io = inner.io.borrow_mut().take();
        let (return_code, state) = match cause {
            Termination::Exited(0) => (0, TaskState::Succeeded),
            Termination::Exited(code) => (code, TaskState::Failed),
            Termination::TimedOut => (-1, TaskState::TimedOut),
            Termination::Killed => (-1, TaskState::Killed),
        };

        let mut io = io;
        let output = match io.as_mut() {
            Some(io) => {
                if cause == Termination::TimedOut {
                    self.kill_process(io.process.as_mut());
                }
                self.read_all_output(io.output.as_mut())
            }
            None => String::new(),
        };

        inner.state.set(state);
        info!(
            task_id = %inner.id,
            state = ?state,
            exit_code = return_code,
            elapsed = self.elapsed(),
            output_bytes = output.len(),
            "task finished"
        );

        let completion = Completion {
            return_code,
            output,
            timed_out: cause == Termination::TimedOut,
            killed: cause == Termination::Killed,
        };
        let callback = inner.on_completion.borrow_mut().take();
        if let Some(callback) = callback {
            guarded(inner.id, "completion", move || callback(completion));
        }

        if let Some(io) = io {
            let TaskIo {
                mut process, output, ..
            } = io;
            if cause == Termination::Killed {
                self.kill_process(process.as_mut());
            }
            if let Err(e) = output.release() {
                warn!(task_id = %inner.id, error = %e, "failed to release output capture");
            }
        }

        match inner.registry.upgrade() {
            Some(registry) => {
                registry.remove(inner.id);
            }
            None => debug!(task_id = %inner.id, "registry gone; nothing to deregister"),
        }
    }

    fn kill_process(&self, process: &mut dyn ProcessHandle) {
        if let Err(e) = process.kill() {
            warn!(task_id = %self.inner.id, error = %e, "failed to kill process");
        }
    }

    fn read_all_output(&self, output: &mut dyn OutputSink) -> String {
        match output.read_from(0) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(task_id = %self.inner.id, error = %e, "failed to read captured output");
                String::new()
            }
        }
    }
}

impl fmt::Debug for ProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTask")
            .field("id", &self.inner.id)
            .field("command", &self.inner.command)
            .field("metadata", &self.inner.metadata)
            .field("state", &self.inner.state.get())
            .field("elapsed", &self.elapsed())
            .field("disabled", &self.inner.disabled.get())
            .finish_non_exhaustive()
    }
}

/// `command args > {tags}`, the form used in "kill observed processes"
/// listings.
impl fmt::Display for ProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} > {}",
            display_command(&self.inner.command),
            format_metadata(&self.inner.metadata)
        )
    }
}

/// Run a user callback, logging instead of unwinding into the scheduler.
fn guarded(task: TaskId, which: &'static str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                task_id = %task,
                callback = which,
                panic = %panic_message(payload.as_ref()),
                "task callback panicked"
            );
            false
        }
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_match_documented_values() {
        let spec = TaskSpec::new(["echo", "hi"]);
        assert_eq!(spec.poll_frequency, DEFAULT_POLL_FREQUENCY);
        assert_eq!(spec.timeout_secs, 0);
        assert!(spec.metadata.is_empty());
        assert!(spec.env.is_none());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn spec_rejects_empty_command_and_bad_frequency() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            TaskSpec::new(empty).validate(),
            Err(RunwatchError::InvalidCommand(_))
        ));
        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-300] {
            assert!(matches!(
                TaskSpec::new(["true"]).poll_frequency(hz).validate(),
                Err(RunwatchError::InvalidPollFrequency(_))
            ));
        }
    }

    #[test]
    fn completion_success_requires_clean_exit() {
        let base = Completion {
            return_code: 0,
            output: String::new(),
            timed_out: false,
            killed: false,
        };
        assert!(base.success());
        assert!(!Completion { return_code: 2, ..base.clone() }.success());
        assert!(!Completion { timed_out: true, ..base.clone() }.success());
        assert!(!Completion { killed: true, ..base }.success());
    }

    #[test]
    fn guarded_swallows_panics() {
        assert!(guarded(TaskId::new(1), "test", || {}));
        assert!(!guarded(TaskId::new(1), "test", || panic!("boom")));
    }
}
