// tests/task_registry.rs

mod common;
use crate::common::{FakeLauncher, Recorder, fake_supervisor, init_tracing};

use std::error::Error;
use std::time::Duration;

use runwatch::engine::{TagFilter, TaskCallbacks, TaskSpec};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn query_matches_exact_tag_subsets() -> TestResult {
    init_tracing();
    let (supervisor, _clock) = fake_supervisor(FakeLauncher::new());

    let run_a = supervisor.spawn(
        TaskSpec::new(["engine", "run", "a"])
            .tag("image_name", "a")
            .tag("operation", "run"),
        TaskCallbacks::new(),
    )?;
    let pull_a = supervisor.spawn(
        TaskSpec::new(["engine", "pull", "a"])
            .tag("image_name", "a")
            .tag("operation", "update"),
        TaskCallbacks::new(),
    )?;
    let untagged = supervisor.spawn(TaskSpec::new(["engine", "ps"]), TaskCallbacks::new())?;

    let registry = supervisor.registry();
    assert_eq!(registry.len(), 3);

    let runs = registry.query(&TagFilter::new().tag("operation", "run"));
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id(), run_a.id());

    let image_a = registry.query(&TagFilter::new().tag("image_name", "a"));
    assert_eq!(image_a.len(), 2);

    // Value types must match too.
    assert!(!registry.any(&TagFilter::new().tag("image_name", 1i64)));
    assert!(!registry.any(&TagFilter::new().tag("image_name", "b")));

    // Untagged tasks never match, not even an empty filter.
    let all_tagged = registry.query(&TagFilter::new());
    assert_eq!(all_tagged.len(), 2);
    assert!(all_tagged.iter().all(|t| t.id() != untagged.id()));

    pull_a.kill();
    assert_eq!(registry.query(&TagFilter::new().tag("image_name", "a")).len(), 1);
    assert_eq!(registry.len(), 2);
    Ok(())
}

#[test]
fn kill_all_terminates_every_task_once() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());

    let recorders: Vec<Recorder> = (0..3).map(|_| Recorder::new()).collect();
    for (i, recorder) in recorders.iter().enumerate() {
        supervisor.spawn(
            TaskSpec::new(vec!["worker".to_string(), i.to_string()]).tag("batch", 7i64),
            recorder.callbacks(),
        )?;
    }
    clock.advance(Duration::from_millis(500));

    assert_eq!(supervisor.kill_all(), 3);

    for recorder in &recorders {
        assert_eq!(recorder.completion_count(), 1);
        assert!(recorder.completion().killed);
    }
    for i in 0..3 {
        assert_eq!(launcher.process(i).kill_calls(), 1);
        assert!(launcher.process(i).is_released());
    }
    assert!(supervisor.registry().is_empty());
    assert_eq!(clock.active_schedules(), 0);

    clock.advance(Duration::from_secs(10));
    assert!(recorders.iter().all(|r| r.completion_count() == 1));
    Ok(())
}

#[test]
fn snapshot_is_unaffected_by_later_changes() -> TestResult {
    init_tracing();
    let (supervisor, _clock) = fake_supervisor(FakeLauncher::new());

    let first = supervisor.spawn(TaskSpec::new(["one"]).tag("k", true), TaskCallbacks::new())?;
    let snapshot = supervisor.registry().snapshot();

    supervisor.spawn(TaskSpec::new(["two"]).tag("k", true), TaskCallbacks::new())?;
    first.kill();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id(), first.id());
    assert!(snapshot[0].is_disabled());
    assert_eq!(supervisor.registry().len(), 1);
    Ok(())
}

#[test]
fn ids_are_unique_across_tasks() -> TestResult {
    init_tracing();
    let (supervisor, _clock) = fake_supervisor(FakeLauncher::new());

    let a = supervisor.spawn(TaskSpec::new(["a"]), TaskCallbacks::new())?;
    let b = supervisor.spawn(TaskSpec::new(["b"]), TaskCallbacks::new())?;
    assert_ne!(a.id(), b.id());

    supervisor.kill_all();
    let c = supervisor.spawn(TaskSpec::new(["c"]), TaskCallbacks::new())?;
    assert!(c.id() > b.id());
    Ok(())
}
