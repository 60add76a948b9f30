// src/exec/launcher.rs

//! Pluggable process launcher abstraction.
//!
//! Tasks never touch `std::process` directly. They ask a [`Launcher`] for a
//! [`Spawned`] pair: a handle to poll/kill the process and the sink its output
//! lands in. Production code uses [`SystemLauncher`](super::SystemLauncher);
//! tests can provide scripted fakes that never spawn anything.

use std::collections::HashMap;
use std::io;

use crate::errors::Result;

use super::capture::OutputSink;

/// Everything a launcher needs to start one command.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Program followed by its arguments.
    pub command: &'a [String],
    /// Complete environment for the child. `None` inherits the parent's.
    pub env: Option<&'a HashMap<String, String>>,
}

/// Handle to a running (or exited, not yet observed) process.
pub trait ProcessHandle {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check. `Some(code)` once the process has exited;
    /// processes ended by a signal report `-1`.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate the process. Must tolerate an already-exited
    /// process.
    fn kill(&mut self) -> io::Result<()>;
}

/// A freshly started process together with its output sink.
pub struct Spawned {
    pub process: Box<dyn ProcessHandle>,
    pub output: Box<dyn OutputSink>,
}

/// Trait abstracting how commands become processes.
pub trait Launcher {
    /// Start `request.command`. Fails only if the process could not be
    /// spawned at all.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Spawned>;
}

/// Render a command line for logs and error messages.
pub fn display_command(command: &[String]) -> String {
    command.join(" ")
}
