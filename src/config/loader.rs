// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::Result;

/// Load a job file from a given path and return the raw `RawJobFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Parse job TOML held in memory.
pub fn parse_str(contents: &str) -> Result<RawJobFile> {
    let raw: RawJobFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a job file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks that there is at least one step, that every step has a program,
///   and that poll frequencies are usable.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobFile> {
    let raw = load_from_path(&path)?;
    JobFile::try_from(raw)
}
