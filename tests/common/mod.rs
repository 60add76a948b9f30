// tests/common/mod.rs
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use runwatch::engine::{Completion, TaskCallbacks};
use tempfile::NamedTempFile;

pub use runwatch_test_utils::builders;
pub use runwatch_test_utils::{
    FakeBehaviour, FakeLauncher, FakeProcessControl, fake_supervisor, init_tracing,
};

/// Everything a task reported through its callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    pub progress: Rc<RefCell<Vec<(f64, String)>>>,
    pub completions: Rc<RefCell<Vec<Completion>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> TaskCallbacks {
        let progress = Rc::clone(&self.progress);
        let completions = Rc::clone(&self.completions);
        TaskCallbacks::new()
            .on_progress(move |elapsed, chunk| {
                progress.borrow_mut().push((elapsed, chunk.to_string()))
            })
            .on_completion(move |c| completions.borrow_mut().push(c))
    }

    pub fn completion_count(&self) -> usize {
        self.completions.borrow().len()
    }

    pub fn completion(&self) -> Completion {
        self.completions
            .borrow()
            .first()
            .cloned()
            .expect("no completion recorded")
    }

    pub fn progress_elapsed(&self) -> Vec<f64> {
        self.progress.borrow().iter().map(|(e, _)| *e).collect()
    }

    pub fn streamed_output(&self) -> String {
        self.progress
            .borrow()
            .iter()
            .map(|(_, s)| s.as_str())
            .collect()
    }
}

/// Write `contents` to a fresh temp file that lives as long as the handle.
pub fn write_job_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}
