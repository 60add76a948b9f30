// src/config/mod.rs

//! Job file loading and validation for runwatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a job file from disk (`loader.rs`).
//! - Validate steps and job settings (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{JobFile, JobSection, RawJobFile, StepConfig};
