// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually starting the commands handed to
//! the supervisor and exposing them behind small, fake-able seams.
//!
//! - [`launcher`] defines the `Launcher` / `ProcessHandle` traits.
//! - [`system`] provides `SystemLauncher`, the `std::process` implementation.
//! - [`capture`] holds the output sinks (memory, temp file, null).
//! - [`utf8`] decodes streamed output without splitting characters.
//! - [`environment`] builds child environments.

pub mod capture;
pub mod environment;
pub mod launcher;
pub mod system;
pub mod utf8;

pub use capture::{FileCapture, MemoryCapture, NullCapture, OutputSink};
pub use launcher::{LaunchRequest, Launcher, ProcessHandle, Spawned, display_command};
pub use system::SystemLauncher;
pub use utf8::Utf8Decoder;
