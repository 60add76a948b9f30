// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunwatchError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Poll frequency must be a positive, finite number of Hz (got {0})")]
    InvalidPollFrequency(f64),

    #[error("Process chain already started")]
    ChainAlreadyStarted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, RunwatchError>;
