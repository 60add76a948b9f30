// src/exec/system.rs

//! Launcher that spawns real OS processes.

use std::io;
use std::process::{Child, Command, Stdio};

use tokio::process::{ChildStderr, ChildStdout};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::errors::{Result, RunwatchError};
use crate::types::CaptureMode;

use super::capture::{FileCapture, MemoryCapture, NullCapture, OutputSink};
use super::launcher::{LaunchRequest, Launcher, ProcessHandle, Spawned, display_command};

/// Production launcher backed by `std::process::Command`.
///
/// stdin is closed; stdout and stderr both go into one capture sink selected
/// by [`CaptureMode`]. Memory capture reads the pipes on the current tokio
/// runtime, so launching in that mode outside a runtime is a spawn error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher {
    capture: CaptureMode,
}

impl SystemLauncher {
    pub fn new(capture: CaptureMode) -> Self {
        Self { capture }
    }

    fn spawn(command: &mut Command, request: &LaunchRequest<'_>) -> Result<Child> {
        command.spawn().map_err(|source| RunwatchError::Spawn {
            command: display_command(request.command),
            source,
        })
    }

    fn launch_with_file(&self, mut command: Command, request: &LaunchRequest<'_>) -> Result<Spawned> {
        let output: Box<dyn OutputSink> = match FileCapture::create() {
            Ok((capture, stdout, stderr)) => {
                command.stdout(stdout).stderr(stderr);
                Box::new(capture)
            }
            Err(e) => {
                warn!(
                    cmd = %display_command(request.command),
                    error = %e,
                    "could not create output capture file; output will be discarded"
                );
                command.stdout(Stdio::null()).stderr(Stdio::null());
                Box::new(NullCapture)
            }
        };

        let child = Self::spawn(&mut command, request)?;
        Ok(Spawned {
            process: Box::new(SystemProcess { child }),
            output,
        })
    }

    fn launch_with_memory(&self, mut command: Command, request: &LaunchRequest<'_>) -> Result<Spawned> {
        let runtime = Handle::try_current().map_err(|e| RunwatchError::Spawn {
            command: display_command(request.command),
            source: io::Error::other(format!("memory capture needs a tokio runtime: {e}")),
        })?;

        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = Self::spawn(&mut command, request)?;

        // Pipe registration needs the runtime's reactor.
        let _entered = runtime.enter();
        let mut capture = MemoryCapture::new();
        if let Some(stdout) = child.stdout.take() {
            match ChildStdout::from_std(stdout) {
                Ok(pipe) => capture.attach(&runtime, "stdout", pipe),
                Err(e) => warn_lost_stream("stdout", &e),
            }
        }
        if let Some(stderr) = child.stderr.take() {
            match ChildStderr::from_std(stderr) {
                Ok(pipe) => capture.attach(&runtime, "stderr", pipe),
                Err(e) => warn_lost_stream("stderr", &e),
            }
        }

        Ok(Spawned {
            process: Box::new(SystemProcess { child }),
            output: Box::new(capture),
        })
    }
}

fn warn_lost_stream(name: &'static str, error: &io::Error) {
    warn!(pipe = name, error = %error, "could not start output reader; this stream is lost");
}

impl Launcher for SystemLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Spawned> {
        let (program, args) = request.command.split_first().ok_or_else(|| {
            RunwatchError::InvalidCommand("command must contain at least a program".to_string())
        })?;

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if let Some(env) = request.env {
            command.env_clear().envs(env);
        }

        debug!(
            cmd = %display_command(request.command),
            capture = ?self.capture,
            custom_env = request.env.is_some(),
            "launching process"
        );

        match self.capture {
            CaptureMode::Memory => self.launch_with_memory(command, request),
            CaptureMode::File => self.launch_with_file(command, request),
        }
    }
}

/// A `std::process::Child` behind the [`ProcessHandle`] seam.
#[derive(Debug)]
pub struct SystemProcess {
    child: Child,
}

impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill()?;
        // Reap so the child does not linger as a zombie.
        self.child.wait()?;
        Ok(())
    }
}
