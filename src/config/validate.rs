// src/config/validate.rs

use crate::config::model::{JobFile, RawJobFile, StepConfig};
use crate::engine::task::validate_poll_frequency;
use crate::errors::{Result, RunwatchError};

impl TryFrom<RawJobFile> for JobFile {
    type Error = crate::errors::RunwatchError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_job(&raw)?;
        Ok(JobFile::new_unchecked(raw.job, raw.steps))
    }
}

fn validate_raw_job(raw: &RawJobFile) -> Result<()> {
    ensure_has_steps(raw)?;
    validate_job_section(raw)?;
    for (index, step) in raw.steps.iter().enumerate() {
        validate_step(index, step)?;
    }
    Ok(())
}

fn ensure_has_steps(raw: &RawJobFile) -> Result<()> {
    if raw.steps.is_empty() {
        return Err(RunwatchError::ConfigError(
            "job must contain at least one [[step]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_job_section(raw: &RawJobFile) -> Result<()> {
    if raw.job.name.trim().is_empty() {
        return Err(RunwatchError::ConfigError(
            "[job].name must not be empty".to_string(),
        ));
    }

    if raw.job.tags.keys().any(|k| k.trim().is_empty()) {
        return Err(RunwatchError::ConfigError(
            "[job.tags] keys must not be empty".to_string(),
        ));
    }

    for key in raw.job.env.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(RunwatchError::ConfigError(format!(
                "[job.env] has invalid variable name '{}'",
                key
            )));
        }
    }

    Ok(())
}

fn validate_step(index: usize, step: &StepConfig) -> Result<()> {
    let label = step
        .name
        .clone()
        .unwrap_or_else(|| format!("#{}", index + 1));

    match step.cmd.first() {
        None => {
            return Err(RunwatchError::ConfigError(format!(
                "step '{}' has an empty `cmd`",
                label
            )));
        }
        Some(program) if program.trim().is_empty() => {
            return Err(RunwatchError::ConfigError(format!(
                "step '{}' has an empty program name in `cmd`",
                label
            )));
        }
        Some(_) => {}
    }

    if validate_poll_frequency(step.poll_frequency).is_err() {
        return Err(RunwatchError::ConfigError(format!(
            "step '{}' has invalid poll_frequency {} (must be > 0 with a representable interval)",
            label, step.poll_frequency
        )));
    }

    Ok(())
}
