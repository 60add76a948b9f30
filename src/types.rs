// src/types.rs

//! Small value types shared across the crate.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Opaque metadata value attached to a task.
///
/// The supervisor never interprets these; they only exist so the registry can
/// answer questions like "is a `run` task active for image X".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{b}"),
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::Int(i64::from(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// Tag map attached to a task at construction.
pub type Metadata = BTreeMap<String, TagValue>;

/// Where a task's merged stdout/stderr is buffered while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Append-only in-memory buffer fed by pipe reader tasks.
    #[default]
    Memory,
    /// Named temporary file shared by stdout and stderr, read with a cursor.
    /// Suited to very chatty commands.
    File,
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(CaptureMode::Memory),
            "file" => Ok(CaptureMode::File),
            other => Err(format!(
                "invalid capture mode: {other} (expected \"memory\" or \"file\")"
            )),
        }
    }
}

/// Render tags as `{k=v, ...}` for log lines and task listings.
pub fn format_metadata(metadata: &Metadata) -> String {
    let pairs: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(", "))
}
