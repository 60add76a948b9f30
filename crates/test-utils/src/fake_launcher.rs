use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use runwatch::errors::{Result, RunwatchError};
use runwatch::exec::{
    LaunchRequest, Launcher, OutputSink, ProcessHandle, Spawned, display_command,
};

/// What a fake process does once launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehaviour {
    /// Keeps running until the test calls `exit` or the task kills it.
    Running,
    /// Already exited with this code by the first poll.
    ExitImmediately(i32),
    /// `launch` fails as if the program did not exist.
    SpawnError,
}

#[derive(Debug, Default)]
struct FakeProcessState {
    output: Vec<u8>,
    exit_code: Option<i32>,
    kill_calls: usize,
    output_held_open: bool,
    released: bool,
}

/// Test-side handle to one fake process: feed it output, make it exit, and
/// inspect what the supervisor did to it.
#[derive(Debug, Clone)]
pub struct FakeProcessControl {
    command: Vec<String>,
    env: Option<HashMap<String, String>>,
    state: Rc<RefCell<FakeProcessState>>,
}

impl FakeProcessControl {
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn env(&self) -> Option<&HashMap<String, String>> {
        self.env.as_ref()
    }

    pub fn push_output(&self, bytes: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .output
            .extend_from_slice(bytes.as_ref());
    }

    /// Make the process exit with `code`; observed on the next poll.
    pub fn exit(&self, code: i32) {
        self.state.borrow_mut().exit_code = Some(code);
    }

    pub fn was_killed(&self) -> bool {
        self.state.borrow().kill_calls > 0
    }

    pub fn kill_calls(&self) -> usize {
        self.state.borrow().kill_calls
    }

    /// Keep the output open after exit, like a background grandchild that
    /// inherited the pipe.
    pub fn hold_output_open(&self) {
        self.state.borrow_mut().output_held_open = true;
    }

    pub fn close_output(&self) {
        self.state.borrow_mut().output_held_open = false;
    }

    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }
}

struct FakeProcess {
    pid: u32,
    state: Rc<RefCell<FakeProcessState>>,
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.state.borrow().exit_code)
    }

    fn kill(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.kill_calls += 1;
        state.exit_code.get_or_insert(-1);
        Ok(())
    }
}

struct FakeSink {
    state: Rc<RefCell<FakeProcessState>>,
}

impl OutputSink for FakeSink {
    fn read_from(&mut self, offset: u64) -> io::Result<Vec<u8>> {
        let state = self.state.borrow();
        let start = (offset as usize).min(state.output.len());
        Ok(state.output[start..].to_vec())
    }

    fn is_drained(&self) -> bool {
        !self.state.borrow().output_held_open
    }

    fn release(self: Box<Self>) -> io::Result<()> {
        self.state.borrow_mut().released = true;
        Ok(())
    }
}

#[derive(Default)]
struct LauncherState {
    behaviours: HashMap<String, FakeBehaviour>,
    default: Option<FakeBehaviour>,
    attempts: Vec<Vec<String>>,
    launched: Vec<FakeProcessControl>,
}

/// A launcher that never spawns anything:
/// - picks a [`FakeBehaviour`] by program name (default: `Running`)
/// - records every launch attempt, including failed ones
/// - hands out a [`FakeProcessControl`] per launched process.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Rc<RefCell<LauncherState>>,
    next_pid: Rc<Cell<u32>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(self, program: &str, behaviour: FakeBehaviour) -> Self {
        self.state
            .borrow_mut()
            .behaviours
            .insert(program.to_string(), behaviour);
        self
    }

    pub fn with_default(self, behaviour: FakeBehaviour) -> Self {
        self.state.borrow_mut().default = Some(behaviour);
        self
    }

    /// Every command passed to `launch`, in order.
    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.state.borrow().attempts.clone()
    }

    /// Programs (first word) of every successfully launched process.
    pub fn launched_programs(&self) -> Vec<String> {
        self.state
            .borrow()
            .launched
            .iter()
            .map(|c| c.command[0].clone())
            .collect()
    }

    pub fn launched_count(&self) -> usize {
        self.state.borrow().launched.len()
    }

    pub fn process(&self, index: usize) -> FakeProcessControl {
        self.state.borrow().launched[index].clone()
    }

    pub fn last(&self) -> Option<FakeProcessControl> {
        self.state.borrow().launched.last().cloned()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Spawned> {
        let mut launcher = self.state.borrow_mut();
        launcher.attempts.push(request.command.to_vec());

        let program = request.command.first().cloned().unwrap_or_default();
        let behaviour = launcher
            .behaviours
            .get(&program)
            .copied()
            .or(launcher.default)
            .unwrap_or(FakeBehaviour::Running);

        let process_state = FakeProcessState::default();
        let state = Rc::new(RefCell::new(process_state));
        match behaviour {
            FakeBehaviour::SpawnError => {
                return Err(RunwatchError::Spawn {
                    command: display_command(request.command),
                    source: io::Error::new(io::ErrorKind::NotFound, "fake spawn failure"),
                });
            }
            FakeBehaviour::ExitImmediately(code) => state.borrow_mut().exit_code = Some(code),
            FakeBehaviour::Running => {}
        }

        launcher.launched.push(FakeProcessControl {
            command: request.command.to_vec(),
            env: request.env.cloned(),
            state: Rc::clone(&state),
        });

        let pid = self.next_pid.get() + 1000;
        self.next_pid.set(self.next_pid.get() + 1);

        Ok(Spawned {
            process: Box::new(FakeProcess {
                pid,
                state: Rc::clone(&state),
            }),
            output: Box::new(FakeSink { state }),
        })
    }
}
