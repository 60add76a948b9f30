// src/config/model.rs

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::{ChainStep, DEFAULT_POLL_FREQUENCY};
use crate::exec::environment;
use crate::types::{CaptureMode, Metadata};

/// Job file as read from TOML, before validation.
///
/// ```toml
/// [job]
/// name = "segment-ct"
/// capture = "memory"
/// executable = "/usr/local/bin/udocker"
///
/// [job.tags]
/// operation = "run"
/// image = "mhubai/totalsegmentator:latest"
///
/// [[step]]
/// name = "Pull image"
/// cmd = ["udocker", "pull", "mhubai/totalsegmentator:latest"]
///
/// [[step]]
/// name = "Run container"
/// cmd = ["udocker", "run", "--rm", "totalsegmentator"]
/// timeout = 1200
/// poll_frequency = 2.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobFile {
    #[serde(default)]
    pub job: JobSection,

    /// Steps in execution order, from `[[step]]`.
    #[serde(default, rename = "step")]
    pub steps: Vec<StepConfig>,
}

/// Validated job file. Build one with `JobFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub job: JobSection,
    pub steps: Vec<StepConfig>,
}

impl JobFile {
    pub(crate) fn new_unchecked(job: JobSection, steps: Vec<StepConfig>) -> Self {
        Self { job, steps }
    }

    /// Environment handed to every step.
    pub fn environment(&self) -> HashMap<String, String> {
        environment::build(
            self.job.inherit_env,
            &self.job.env,
            self.job.executable.as_deref(),
        )
    }

    /// Give `secs` to every step that has no timeout of its own.
    pub fn apply_default_timeout(&mut self, secs: u64) {
        for step in self.steps.iter_mut().filter(|s| s.timeout == 0) {
            step.timeout = secs;
        }
    }

    pub fn chain_steps(&self) -> Vec<ChainStep> {
        self.steps.iter().map(StepConfig::to_chain_step).collect()
    }
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    #[serde(default = "default_job_name")]
    pub name: String,

    /// `"memory"` (default) or `"file"`.
    #[serde(default)]
    pub capture: CaptureMode,

    /// Start from the current environment (default) or from nothing.
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,

    /// Extra variables, applied on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Container engine binary whose directory is put on `PATH`.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Tags attached to every task of the job.
    #[serde(default)]
    pub tags: Metadata,
}

fn default_job_name() -> String {
    "job".to_string()
}

fn default_inherit_env() -> bool {
    true
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            capture: CaptureMode::default(),
            inherit_env: default_inherit_env(),
            env: HashMap::new(),
            executable: None,
            tags: Metadata::new(),
        }
    }
}

/// `[[step]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Program and arguments, passed to the OS verbatim (no shell).
    pub cmd: Vec<String>,

    /// Seconds; 0 means no timeout.
    #[serde(default)]
    pub timeout: u64,

    /// Ticks per second.
    #[serde(default = "default_poll_frequency")]
    pub poll_frequency: f64,
}

fn default_poll_frequency() -> f64 {
    DEFAULT_POLL_FREQUENCY
}

impl StepConfig {
    pub fn to_chain_step(&self) -> ChainStep {
        let mut step = ChainStep::new(self.cmd.iter().cloned())
            .timeout_secs(self.timeout)
            .poll_frequency(self.poll_frequency);
        if let Some(name) = &self.name {
            step = step.name(name.clone());
        }
        step
    }
}
