#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use runwatch::config::{JobFile, JobSection, RawJobFile, StepConfig};
use runwatch::engine::DEFAULT_POLL_FREQUENCY;
use runwatch::types::{CaptureMode, TagValue};

/// Builder for `JobFile` to simplify test setup.
pub struct JobFileBuilder {
    job: RawJobFile,
}

impl JobFileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: RawJobFile {
                job: JobSection {
                    name: name.to_string(),
                    ..JobSection::default()
                },
                steps: vec![],
            },
        }
    }

    pub fn with_step(mut self, step: StepConfig) -> Self {
        self.job.steps.push(step);
        self
    }

    pub fn with_tag(mut self, key: &str, value: impl Into<TagValue>) -> Self {
        self.job.job.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.job.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn inherit_env(mut self, val: bool) -> Self {
        self.job.job.inherit_env = val;
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.job.job.capture = mode;
        self
    }

    pub fn executable(mut self, path: &str) -> Self {
        self.job.job.executable = Some(PathBuf::from(path));
        self
    }

    pub fn raw(self) -> RawJobFile {
        self.job
    }

    pub fn build(self) -> JobFile {
        JobFile::try_from(self.job).expect("Failed to build valid job from builder")
    }
}

/// Builder for `StepConfig`.
pub struct StepBuilder {
    step: StepConfig,
}

impl StepBuilder {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            step: StepConfig {
                name: None,
                cmd: cmd.iter().map(|s| s.to_string()).collect(),
                timeout: 0,
                poll_frequency: DEFAULT_POLL_FREQUENCY,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.step.name = Some(name.to_string());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.step.timeout = secs;
        self
    }

    pub fn poll_frequency(mut self, hz: f64) -> Self {
        self.step.poll_frequency = hz;
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}

/// Environment map from literal pairs.
pub fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
