// src/exec/environment.rs

//! Child environment construction.
//!
//! Container engines are often installed outside the default `PATH` (and
//! their helpers are looked up next to the main binary), so the environment
//! handed to a task can have the engine's directory prepended.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// The current process environment as an owned map.
///
/// Variables whose name or value is not valid UTF-8 are skipped.
pub fn inherited() -> HashMap<String, String> {
    env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let name = match &key {
                    Ok(k) => k.clone(),
                    Err(k) => k.to_string_lossy().into_owned(),
                };
                warn!(variable = %name, "skipping non-UTF-8 environment variable");
                None
            }
        })
        .collect()
}

/// Prepend the directory of `executable`, and the directory of its resolved
/// target if it is a symlink, to `PATH` in `env`.
///
/// Directories already on `PATH` are not duplicated.
pub fn prepend_executable_dir(env: &mut HashMap<String, String>, executable: &Path) {
    let mut entries: Vec<PathBuf> = env
        .get("PATH")
        .map(|p| env::split_paths(p).collect())
        .unwrap_or_default();

    let exec_dir = executable.parent().map(Path::to_path_buf);
    let real_dir = executable
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));

    for dir in [exec_dir, real_dir].into_iter().flatten() {
        if dir.as_os_str().is_empty() || entries.contains(&dir) {
            continue;
        }
        debug!(dir = %dir.display(), "prepending executable directory to PATH");
        entries.insert(0, dir);
    }

    match env::join_paths(&entries) {
        Ok(joined) => {
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
        Err(e) => warn!(error = %e, "cannot rebuild PATH; leaving it unchanged"),
    }
}

/// Inherited environment plus `overrides`, optionally with `executable`'s
/// directory on `PATH`.
pub fn build(
    inherit: bool,
    overrides: &HashMap<String, String>,
    executable: Option<&Path>,
) -> HashMap<String, String> {
    let mut env = if inherit { inherited() } else { HashMap::new() };
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(executable) = executable {
        prepend_executable_dir(&mut env, executable);
    }
    env
}
